pub mod account;
pub mod fill;
pub mod ids;
pub mod instrument;
pub mod message;
pub mod order;
pub mod pnl;
