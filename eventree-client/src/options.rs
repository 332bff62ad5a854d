//! Read and observe request modifiers.
//!
//! Each store operation accepts only a fixed subset of options; the client
//! rejects unsupported combinations locally before issuing any request.

use crate::error::ClientError;
use crate::types::Subject;
use serde_json::{json, Map, Value};

/// Ordering of events returned by a bounded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Oldest events first. The store's default.
    Chronological,
    /// Newest events first.
    Antichronological,
}

/// What to do when the event named by `FromLatestEvent` does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfEventIsMissing {
    /// Deliver nothing.
    ReadNothing,
    /// Deliver the stream from its beginning (read only).
    ReadEverything,
    /// Block until a matching event is published (observe only).
    WaitForEvent,
}

/// A modifier applied to a read or observe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOption {
    /// Include events of descendant subjects.
    Recursive,
    /// Result ordering. Read only.
    Order(Order),
    /// Deliver only events with an id greater than or equal to the bound.
    LowerBoundId(String),
    /// Deliver only events with an id less than or equal to the bound. Read only.
    UpperBoundId(String),
    /// Start from the latest event of the given subject and type.
    FromLatestEvent {
        /// Subject whose latest event marks the starting point.
        subject: String,
        /// Event type whose latest event marks the starting point.
        event_type: String,
        /// Behavior when no such event exists.
        if_event_is_missing: IfEventIsMissing,
    },
}

/// Discriminates option variants for support checks and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// `StoreOption::Recursive`
    Recursive,
    /// `StoreOption::Order`
    Order,
    /// `StoreOption::LowerBoundId`
    LowerBoundId,
    /// `StoreOption::UpperBoundId`
    UpperBoundId,
    /// `StoreOption::FromLatestEvent`
    FromLatestEvent,
}

impl StoreOption {
    /// The kind of this option.
    pub const fn kind(&self) -> OptionKind {
        match self {
            Self::Recursive => OptionKind::Recursive,
            Self::Order(_) => OptionKind::Order,
            Self::LowerBoundId(_) => OptionKind::LowerBoundId,
            Self::UpperBoundId(_) => OptionKind::UpperBoundId,
            Self::FromLatestEvent { .. } => OptionKind::FromLatestEvent,
        }
    }
}

/// The option surface of one store operation: which option kinds it accepts,
/// and which `FromLatestEvent` missing-event strategies are meaningful for it.
pub struct OperationSupport {
    kinds: &'static [OptionKind],
    missing_strategies: &'static [IfEventIsMissing],
}

/// Options legal for `read`.
pub const READ_OPTIONS: OperationSupport = OperationSupport {
    kinds: &[
        OptionKind::Recursive,
        OptionKind::Order,
        OptionKind::LowerBoundId,
        OptionKind::UpperBoundId,
        OptionKind::FromLatestEvent,
    ],
    // A bounded read cannot block on a future event.
    missing_strategies: &[IfEventIsMissing::ReadNothing, IfEventIsMissing::ReadEverything],
};

/// Options legal for `observe`.
pub const OBSERVE_OPTIONS: OperationSupport = OperationSupport {
    kinds: &[
        OptionKind::Recursive,
        OptionKind::LowerBoundId,
        OptionKind::FromLatestEvent,
    ],
    // An endless observation has no "everything so far" notion.
    missing_strategies: &[IfEventIsMissing::ReadNothing, IfEventIsMissing::WaitForEvent],
};

/// Fails with a usage error if any requested option is unsupported for the
/// operation, avoiding a wasted round trip.
pub fn ensure_supported(
    requested: &[StoreOption],
    support: &OperationSupport,
) -> Result<(), ClientError> {
    let unsupported: Vec<OptionKind> = requested
        .iter()
        .map(StoreOption::kind)
        .filter(|kind| !support.kinds.contains(kind))
        .collect();
    if !unsupported.is_empty() {
        return Err(ClientError::InvalidUsage(format!(
            "unsupported option(s) used: {unsupported:?}"
        )));
    }

    for option in requested {
        if let StoreOption::FromLatestEvent {
            if_event_is_missing,
            ..
        } = option
        {
            if !support.missing_strategies.contains(if_event_is_missing) {
                return Err(ClientError::InvalidUsage(format!(
                    "ifEventIsMissing strategy {if_event_is_missing:?} is not supported by this operation"
                )));
            }
        }
    }
    Ok(())
}

/// Builds the JSON request body shared by read and observe.
pub fn request_body(subject: &Subject, options: &[StoreOption]) -> Value {
    let mut opts = Map::new();
    for option in options {
        match option {
            StoreOption::Recursive => {
                opts.insert("recursive".into(), json!(true));
            }
            StoreOption::Order(order) => {
                let order = match order {
                    Order::Chronological => "chronological",
                    Order::Antichronological => "antichronological",
                };
                opts.insert("order".into(), json!(order));
            }
            StoreOption::LowerBoundId(id) => {
                opts.insert("lowerBoundId".into(), json!(id));
            }
            StoreOption::UpperBoundId(id) => {
                opts.insert("upperBoundId".into(), json!(id));
            }
            StoreOption::FromLatestEvent {
                subject,
                event_type,
                if_event_is_missing,
            } => {
                let strategy = match if_event_is_missing {
                    IfEventIsMissing::ReadNothing => "read-nothing",
                    IfEventIsMissing::ReadEverything => "read-everything",
                    IfEventIsMissing::WaitForEvent => "wait-for-event",
                };
                opts.insert(
                    "fromLatestEvent".into(),
                    json!({
                        "subject": subject,
                        "type": event_type,
                        "ifEventIsMissing": strategy,
                    }),
                );
            }
        }
    }

    json!({
        "subject": subject.as_ref(),
        "options": Value::Object(opts),
    })
}
