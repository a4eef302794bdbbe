//! Core types of the collaborative annotation change engine.
//!
//! Contains the annotation data model, the typed change operations with
//! their registry and inverses, validators, the broadcast envelope and bus,
//! and the change log record shared by the server and client crates.

pub mod backend;
pub mod bus;
pub mod change;
pub mod config;
pub mod error;
pub mod log_entry;
pub mod message;
pub mod model;
pub mod validation;

pub use backend::{ChangeBackend, ReplayAck};
pub use bus::{InMemoryBus, MessageBus, Subscription};
pub use change::{Change, ChangeOperation, ChangeRegistry, ChangeType, RouteTarget};
pub use config::EngineConfig;
pub use error::{CollabError, Result, ValidationStage};
pub use log_entry::{ChangeFilter, ChangeLogEntry};
pub use message::{Channel, Message, COMMON_CHANNEL};
pub use model::{AnnotationStore, StoreEvent};
pub use validation::{PermissionTable, ValidationContext, ValidationRegistry, Validator};
