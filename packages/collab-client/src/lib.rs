//! Client side of the collaborative annotation engine.
//!
//! Keeps a local mirror of the loaded assemblies, applies edits
//! optimistically before the server confirms them, consumes broadcast
//! changes while skipping its own echoes, and replays missed changes after
//! a reconnect.

pub mod change_manager;
pub mod config;
pub mod data_store;
pub mod error;
pub mod sync;

pub use change_manager::{ChangeManager, MessageOutcome, SessionEvent, SubmitOptions};
pub use config::ClientConfig;
pub use data_store::ClientDataStore;
pub use error::{ClientError, Result};
pub use sync::{ClientSession, ReplaySync};
