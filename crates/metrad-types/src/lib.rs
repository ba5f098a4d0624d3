#[allow(non_snake_case)]
pub mod status_code;

pub mod result;
pub mod status;

#[macro_use]
pub mod strong_type;

pub mod config;
pub mod ids;
pub mod metric;
pub mod namespace;
pub mod plugin;
pub mod time;

// Re-export commonly used items at the crate root.
pub use config::{ConfigDataNode, ConfigValue};
pub use ids::*;
pub use metric::{Label, Metric, MetricData, MetricType, RequestedMetric};
pub use namespace::{Namespace, NamespaceElement};
pub use plugin::{plugin_key, PluginKind, PluginStatus};
pub use result::{make_error, make_error_msg, Result};
pub use status::Status;
pub use status_code::*;
pub use time::UtcTime;
