//! State store implementations.
//!
//! Production deployments plug a database-backed implementation in via the
//! `StateStore` trait; `memory` keeps everything in process for the demo
//! binary and for tests.

pub mod memory;

pub use memory::InMemoryStore;
