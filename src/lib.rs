pub mod config;
pub mod kernel;
pub mod outputs;
pub mod services;
pub mod source;

// Re-export the pieces an embedding source needs
pub use config::Config;
pub use kernel::pipeline::{Pipeline, PipelineConfig};
pub use kernel::pool::ShutdownSummary;
pub use kernel::sample::{EventKind, Sample};
pub use source::{BlockingEmitter, SampleSink};
