pub mod config;
pub mod registry;
pub mod scheduler;
pub mod window;
pub mod ws;

pub use registry::ConnectionRegistry;
pub use scheduler::SchedulerContext;
pub use window::TradingWindow;
