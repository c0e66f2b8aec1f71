pub mod api;
pub mod metrics;

pub use api::{ApiServer, AppState};
pub use metrics::{Metrics, MetricsSnapshot};
