//! # Operations
//!
//! Stage graphs, the executor that walks them and the queues that schedule
//! executor runs.

pub mod executor;
pub mod failure;
pub mod graph;
pub mod notification;
pub mod queue;
pub mod queue_set;
pub mod recovery;
pub mod stages;
pub mod statistics;
pub mod step;

pub use executor::{ExecutionOutcome, OperationExecutor, StageExecutor};
pub use failure::{FailureHandler, LoggingFailureHandler, NoopFailureHandler};
pub use graph::{GraphError, StageGraph};
pub use notification::DirectorNotifier;
pub use queue::OperationQueue;
pub use queue_set::{Collaborators, QueueSet};
pub use recovery::{recover_in_progress_operations, RecoveryReport};
pub use stages::{build_graph, StepDependencies};
pub use statistics::QueueStatisticsSnapshot;
pub use step::{StageResult, Step, StepError, TimeoutReference};
