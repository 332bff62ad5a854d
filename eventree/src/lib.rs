//! Event-sourcing framework over a hierarchical-subject event store.
//!
//! The framework covers the write side and the read side of an
//! event-sourced application:
//!
//! - **Command dispatch** ([`router::CommandRouter`]): source a subject's
//!   events, rebuild state through registered projection steps, invoke the
//!   command's handler, and write the captured events atomically under
//!   optimistic-concurrency preconditions. One store round-trip wins or the
//!   dispatch fails with [`errors::CommandError::Concurrency`]; retrying is
//!   the caller's decision.
//! - **Event handling** ([`eventhandler`]): long-running processors observe
//!   a subject tree per consuming group, distribute events across partitions
//!   by sequencing key, invoke handlers strictly sequentially per partition
//!   with retry backoff, and checkpoint progress after every success for
//!   at-least-once delivery.
//!
//! Store access goes through the [`eventree_client::Client`] port, so
//! applications can swap the HTTP client for the in-memory implementation in
//! tests.
//!
//! ```ignore
//! let router = CommandRouter::builder(client, source)
//!     .with_state_registry(states)
//!     .register(CommandHandlerDefinition::sourced(
//!         |book: Option<&Book>, cmd: &AddPage, publisher| { /* ... */ },
//!     ))
//!     .build();
//! let page_number: u32 = router.send(&AddPage { isbn, content }).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod config;
pub mod errors;
pub mod eventhandler;
pub mod payload;
pub mod router;
pub mod serialization;
pub mod state;

pub use command::{
    Command, CommandEventPublisher, CommandHandler, CommandHandlerDefinition, SourcingMode,
    SubjectCondition,
};
pub use config::{LifecycleMode, ProcessorSettings, StartPosition};
pub use errors::{CommandError, ConfigError, ProcessorError};
pub use eventhandler::{EventHandlerRegistry, GroupId, HandlerError};
pub use payload::{EventPayload, MetaData};
pub use router::{CommandRouter, CommandRouterBuilder};
pub use serialization::{EventData, EventDataMarshaller, JsonEventDataMarshaller, MarshalError};
pub use state::{StateProjector, StateRebuildingRegistry};
