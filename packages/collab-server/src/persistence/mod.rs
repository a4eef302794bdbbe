//! Disk persistence for the authoritative side.

pub mod io_utils;
pub mod persistence_manager;

pub use io_utils::{classify_io_error, retry_io_operation};
pub use persistence_manager::{PersistenceManager, StoreSnapshot};
