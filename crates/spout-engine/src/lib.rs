pub mod backends;
pub mod engine;
pub mod metrics;
pub mod observer;
pub mod policy;
pub mod resolver;
pub mod suite;

pub use backends::{BackendError, BackendKind, BackendRegistry, ModelBackend};
pub use engine::{EngineBuilder, ExecutionEngine, ExecutionError};
pub use metrics::{MetricsRecorder, MetricsWriteError};
pub use observer::{Invocation, InvocationObserver, InvocationTrace};
pub use policy::CallPolicy;
pub use resolver::{PluginResolver, ResolveError, SkillEntry};
pub use suite::{SuiteError, SuiteReport, SuiteRunner};
