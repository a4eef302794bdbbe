//! Authoritative side of the collaborative annotation change engine.
//!
//! [`ChangeService`] runs every submitted change through pre-validation, a
//! serialized store transaction, sequencing, post-validation and commit,
//! then broadcasts it on the channel the router picks.

pub mod backend;
pub mod change_log;
pub mod counter;
pub mod persistence;
pub mod router;
pub mod service;
pub mod store;
pub mod transaction;

pub use backend::LocalBackend;
pub use change_log::ChangeLog;
pub use counter::SequenceCounter;
pub use persistence::PersistenceManager;
pub use service::ChangeService;
pub use store::FeatureStore;
pub use transaction::StoreTransaction;
