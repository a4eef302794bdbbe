//! Integration tests for the change service.
//!
//! 1. Apply pipeline (scenarios, atomicity, concurrency, undo)
//! 2. Replay and client sessions
//! 3. Persistence and recovery

pub mod helpers;
pub mod pipeline_tests;
pub mod persistence_tests;
pub mod replay_tests;
