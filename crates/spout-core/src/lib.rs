pub mod config;
pub mod fingerprint;
pub mod skills;
pub mod telemetry;
pub mod template;
pub mod tokenizer;
pub mod types;

pub use config::Config;
pub use telemetry::{MetricsRow, MetricsWriter};
pub use types::*;
