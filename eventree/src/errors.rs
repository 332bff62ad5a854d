//! Framework error taxonomy.
//!
//! Command dispatch raises exactly one [`CommandError`] per invocation and
//! never retries; retry decisions belong to the caller. Processors raise
//! [`ProcessorError`] only for conditions that end the processor; handler
//! failures inside the retry budget never surface here.

use crate::serialization::MarshalError;
use eventree_client::ClientError;
use thiserror::Error;

/// Errors raised by command dispatch.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No handler definition was registered for the command type.
    #[error("no command handler registered for {0}")]
    NoHandlerRegistered(String),

    /// Fast-path failure of a `Pristine` subject condition: the subject
    /// already holds events. The caller must not retry blindly.
    #[error("subject {0} already exists")]
    SubjectAlreadyExists(String),

    /// Fast-path failure of an `Exists` subject condition: no event has been
    /// published for the subject.
    #[error("subject {0} does not exist")]
    SubjectDoesNotExist(String),

    /// The store rejected the write because a precondition no longer held.
    /// The caller must re-read state and re-decide before retrying.
    #[error("concurrent modification detected: {0}")]
    Concurrency(String),

    /// A store interaction failed for reasons other than concurrency.
    #[error("event store interaction failed: {0}")]
    Client(#[source] ClientError),

    /// Payload or envelope serialization failed. Never retried.
    #[error(transparent)]
    NonTransient(#[from] MarshalError),

    /// A publish target could not be formed into a valid subject.
    #[error("invalid publish subject: {0}")]
    InvalidSubject(String),

    /// A payload type carries an invalid wire type identifier.
    #[error("invalid event type: {0}")]
    InvalidEventType(String),

    /// Rebuilding state from sourced events failed.
    #[error("state rebuilding failed: {0}")]
    StateRebuilding(String),

    /// The command handler body itself failed; dispatch aborted with no
    /// partial writes.
    #[error("command handler failed: {0}")]
    Handler(String),
}

impl From<ClientError> for CommandError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Concurrency(message) => Self::Concurrency(message),
            other => Self::Client(other),
        }
    }
}

/// Conditions that terminate an event-handling processor.
///
/// Variants are self-contained strings so the latest failure can be stored
/// and handed to observers without threading non-clonable sources around.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    /// `start` was called while the processor was already running.
    #[error("processor is already running")]
    AlreadyRunning,

    /// A handler kept failing until the backoff policy's budget ran out.
    /// Operators must decide remediation; the event is not skipped.
    #[error("retry budget exhausted for event {event_id} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Id of the event that could not be handled.
        event_id: String,
        /// Number of handler invocations performed.
        attempts: u32,
        /// Message of the final failure.
        last_error: String,
    },

    /// Loading or saving progress failed.
    #[error("progress tracking failed: {0}")]
    Progress(String),

    /// The event stream could not be established for a non-transient reason,
    /// e.g. an invalid option combination.
    #[error("event stream cannot be established: {0}")]
    Stream(String),

    /// A persisted envelope or payload could not be decoded. Never retried.
    #[error("event data could not be decoded: {0}")]
    NonTransient(String),
}

/// Invalid processor or partition configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The partition index does not fall within the configured count.
    #[error("partition index {partition} out of range for {partitions} partition(s)")]
    PartitionOutOfRange {
        /// The offending partition index.
        partition: u32,
        /// The configured partition count.
        partitions: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_concurrency_maps_to_command_concurrency() {
        let err = CommandError::from(ClientError::Concurrency("subject moved on".into()));
        assert!(matches!(err, CommandError::Concurrency(_)), "got {err:?}");

        let err = CommandError::from(ClientError::Transport("refused".into()));
        assert!(matches!(err, CommandError::Client(_)), "got {err:?}");
    }

    #[test]
    fn processor_errors_render_context() {
        let err = ProcessorError::RetriesExhausted {
            event_id: "17".into(),
            attempts: 4,
            last_error: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "retry budget exhausted for event 17 after 4 attempts: boom"
        );
    }
}
