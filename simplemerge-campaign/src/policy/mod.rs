//! Policies governing how the engine reacts to collaborator failures.

pub mod retry;

pub use retry::RetryPolicy;
