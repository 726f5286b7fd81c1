//! Broker gateway implementations.
//!
//! The real venue client lives outside this crate; `mock` provides a
//! scripted in-process gateway for the demo binary and for pipeline tests.

pub mod mock;

pub use mock::{BrokerOp, MockBrokerGateway};
