pub mod performance;
pub mod store;

pub use performance::PerformanceView;
pub use store::StrategyRegistry;
