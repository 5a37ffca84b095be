//! Built-in execution backends.

pub mod container;
pub mod local;
pub mod workflow;

pub use container::{
    CommandOutput, CommandRunner, ContainerAdapter, ContainerDriver, ContainerState, DockerDriver,
    ExecutionUnit, KubernetesDriver, TokioCommandRunner,
};
pub use local::LocalAdapter;
pub use workflow::{WorkflowAdapter, WorkflowConfigError, to_workflow};
