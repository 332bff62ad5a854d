//! Store health reporting.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Store-reported health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Healthy.
    Pass,
    /// Healthy with concerns.
    Warn,
    /// Unhealthy.
    Fail,
}

/// The store's answer to a health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Overall status.
    pub status: HealthStatus,
    /// Individual checks contributing to the status, as reported.
    #[serde(default)]
    pub checks: Map<String, Value>,
}

impl Health {
    /// Whether the store should be considered available. `warn` still counts
    /// as up; only `fail` maps to down.
    pub const fn is_up(&self) -> bool {
        !matches!(self.status, HealthStatus::Fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn health_deserializes_from_store_response() {
        let health: Health = serde_json::from_value(json!({
            "status": "warn",
            "checks": {"disk": {"status": "warn"}},
        }))
        .unwrap();
        assert_eq!(health.status, HealthStatus::Warn);
        assert!(health.is_up());
        assert!(health.checks.contains_key("disk"));
    }

    #[test]
    fn only_fail_maps_to_down() {
        for (status, up) in [
            (HealthStatus::Pass, true),
            (HealthStatus::Warn, true),
            (HealthStatus::Fail, false),
        ] {
            let health = Health {
                status,
                checks: Map::new(),
            };
            assert_eq!(health.is_up(), up);
        }
    }

    #[test]
    fn checks_default_to_empty() {
        let health: Health = serde_json::from_value(json!({"status": "pass"})).unwrap();
        assert!(health.checks.is_empty());
    }
}
