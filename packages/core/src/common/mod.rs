//! Shared, domain-agnostic types used across the kernel, models and jobs.

pub mod clock;
pub mod id;
pub mod metric_map;

pub use clock::{Clock, FakeClock, SystemClock};
pub use id::Id;
pub use metric_map::MetricMap;
