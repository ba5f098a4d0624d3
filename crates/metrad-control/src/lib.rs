pub mod available;
pub mod catalog;
pub mod config;
pub mod manager;
pub mod monitor;
pub mod pool;
pub mod strategy;

pub use available::AvailablePlugin;
pub use catalog::MetricCatalog;
pub use config::ControlConfig;
pub use manager::{ManagesMetrics, PluginManager};
pub use monitor::HealthMonitor;
pub use pool::{ApHandle, Pool};
pub use strategy::{LeastUsed, PoolMember, RoutingStrategy, StickyRandom};
