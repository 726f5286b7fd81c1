pub mod broker;
pub mod pricing;
pub mod store;
