pub mod cache;
pub mod config;
pub mod export;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod scheduler;
pub mod service;
pub mod sinks;
pub mod sources;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{BoundedCache, CacheEntry};
pub use pipeline::{PipelineError, Sink, Source};
pub use scheduler::{CycleState, Scheduler, SchedulerCfg, SchedulerReport};
pub use service::LiveDataService;
