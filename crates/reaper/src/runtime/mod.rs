//! Container runtime abstraction.
//!
//! The reaper never talks to a runtime daemon directly; everything goes
//! through [`ContainerRuntime`] so the cleanup protocol can be driven by the
//! docker CLI in production and by [`mock::MockRuntime`] in tests.

pub mod docker_cli;
pub mod mock;

use core::error::Error;

use api_types::ResourceKind;
use derive_more::Display;
use error_stack::Report;

pub use docker_cli::DockerCli;

/// Result type for runtime calls.
pub type RuntimeResult<T> = Result<T, Report<RuntimeError>>;

/// Errors reported by a [`ContainerRuntime`].
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The resource does not exist (any more)
    #[display("No such {kind}: {id}")]
    NotFound { kind: ResourceKind, id: String },

    /// The call itself failed
    #[display("Runtime call `{operation}` failed: {message}")]
    Transport { operation: String, message: String },

    /// The call succeeded but its output could not be understood
    #[display("Failed to decode output of `{operation}`: {message}")]
    Decode { operation: String, message: String },
}

impl Error for RuntimeError {}

impl RuntimeError {
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        RuntimeError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeError::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Whether a failed call only tells us the resource is already gone.
pub fn is_not_found(report: &Report<RuntimeError>) -> bool {
    matches!(report.current_context(), RuntimeError::NotFound { .. })
}

/// State of a container as reported by inspect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    pub force: bool,
    pub remove_volumes: bool,
}

impl RemoveOptions {
    /// Force removal of a running container together with its anonymous volumes.
    pub const FORCE_WITH_VOLUMES: RemoveOptions = RemoveOptions {
        force: true,
        remove_volumes: true,
    };
}

/// Resource kinds the bulk prune call understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PruneKind {
    #[display("containers")]
    Containers,
    #[display("networks")]
    Networks,
    #[display("volumes")]
    Volumes,
    #[display("images")]
    Images,
}

impl PruneKind {
    /// Prune order used by the exit-time fallback.
    pub const ALL: [PruneKind; 4] = [
        PruneKind::Containers,
        PruneKind::Networks,
        PruneKind::Volumes,
        PruneKind::Images,
    ];
}

/// Remote resource-control API.
///
/// Every call may fail with a transport error; callers in this crate treat
/// that as "state unknown" and move on.
pub trait ContainerRuntime: Send + Sync {
    fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerState>;

    /// Forcefully stops a container.
    fn kill_container(&self, id: &str) -> RuntimeResult<()>;

    fn remove_container(&self, id: &str, options: RemoveOptions) -> RuntimeResult<()>;

    /// Lists containers in any state that carry all of `label_filters`
    /// (each formatted as `key=value`).
    fn list_containers(&self, label_filters: &[String]) -> RuntimeResult<Vec<ContainerSummary>>;

    /// Lists networks whose ID matches `id`; the result has zero or one entry.
    fn list_networks_by_id(&self, id: &str) -> RuntimeResult<Vec<NetworkSummary>>;

    fn remove_network(&self, id: &str) -> RuntimeResult<()>;

    fn remove_image(&self, name: &str, force: bool) -> RuntimeResult<()>;

    /// Deletes unused resources of `kind` carrying all of `label_filters`.
    fn prune(&self, kind: PruneKind, label_filters: &[String]) -> RuntimeResult<()>;
}
