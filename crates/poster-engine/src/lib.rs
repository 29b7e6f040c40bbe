//! Scheduling, content production and the posting control loop.

pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod schedule;
pub mod text;

pub use error::{MonitorError, PipelineError};
pub use monitor::{BackoffReason, LoopState, Monitor, MonitorConfig, MonitorStatus};
pub use pipeline::{ContentPipeline, GeneratedContent, PipelineStats};
pub use schedule::{SchedulingPolicy, TimeInfo};
pub use text::{TextRules, ValidationFailure};
