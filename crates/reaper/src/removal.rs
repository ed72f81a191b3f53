//! Best-effort removal of a single resource.
//!
//! Container removal walks `inspect -> kill (if running) -> re-inspect ->
//! remove`. "Already gone" ends the walk successfully at any step; any other
//! failure is logged and swallowed. Nothing here returns an error because it
//! runs unattended during drains and at process exit, where one failing
//! resource must not stop the cleanup of the others.

use error_stack::Report;

use crate::runtime::is_not_found;
use crate::runtime::ContainerRuntime;
use crate::runtime::RemoveOptions;
use crate::runtime::RuntimeError;
use crate::runtime::RuntimeResult;

/// How a removal attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The resource was deleted by this attempt.
    Removed,
    /// The resource did not exist (any more).
    AlreadyGone,
    /// The resource state could not be determined; nothing was attempted.
    GaveUp,
    /// The final delete call failed.
    RemoveFailed,
}

/// Log level used when swallowing a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Trace,
    Warn,
}

/// Logs a failed runtime call at `severity` and turns it into `None`.
pub fn swallow<T>(result: RuntimeResult<T>, severity: Severity, what: &str, id: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(report) => {
            log_failure(&report, severity, what, id);
            None
        }
    }
}

fn log_failure(report: &Report<RuntimeError>, severity: Severity, what: &str, id: &str) {
    let cause = report.current_context();
    match severity {
        Severity::Trace => tracing::trace!(id, %cause, "{what}"),
        Severity::Warn => tracing::warn!(id, error = ?report, "{what}"),
    }
}

/// Kills `id` if it is running, then removes it together with its volumes.
///
/// `label` is only used for logging.
pub fn remove_container(runtime: &dyn ContainerRuntime, id: &str, label: Option<&str>) -> RemovalOutcome {
    let label = label.unwrap_or("<unknown>");

    let state = match runtime.inspect_container(id) {
        Ok(state) => state,
        Err(report) if is_not_found(&report) => {
            tracing::trace!(container_id = id, "was going to stop container but it no longer exists");
            return RemovalOutcome::AlreadyGone;
        }
        Err(report) => {
            // State unknown: do not act on it. The watchdog or the label prune
            // is the backstop for whatever is left behind.
            log_failure(
                &report,
                Severity::Trace,
                "error checking container for shutdown; it may not have been stopped",
                id,
            );
            return RemovalOutcome::GaveUp;
        }
    };

    if state.running {
        tracing::trace!(container_id = id, "stopping container");
        if swallow(
            runtime.kill_container(id),
            Severity::Trace,
            "error shutting down container; it may already be stopped",
            id,
        )
        .is_some()
        {
            tracing::trace!(container_id = id, image = label, "stopped container");
        }
    }

    if runtime.inspect_container(id).is_err() {
        tracing::trace!(container_id = id, "was going to remove container but it no longer exists");
        return RemovalOutcome::AlreadyGone;
    }

    tracing::trace!(container_id = id, "removing container");
    match swallow(
        runtime.remove_container(id, RemoveOptions::FORCE_WITH_VOLUMES),
        Severity::Trace,
        "error removing container; it may not have been removed",
        id,
    ) {
        Some(()) => {
            tracing::debug!(container_id = id, image = label, "removed container and associated volume(s)");
            RemovalOutcome::Removed
        }
        None => RemovalOutcome::RemoveFailed,
    }
}

/// Removes the network `id` if it still exists.
///
/// `on_removed` is called with the full ID of every network actually deleted.
pub fn remove_network(
    runtime: &dyn ContainerRuntime,
    id: &str,
    mut on_removed: impl FnMut(&str),
) -> RemovalOutcome {
    // Listing first avoids a noisy failed delete for networks that are gone.
    let Some(networks) = swallow(
        runtime.list_networks_by_id(id),
        Severity::Trace,
        "error looking up network for removal; it may not have been removed",
        id,
    ) else {
        return RemovalOutcome::GaveUp;
    };

    let mut outcome = RemovalOutcome::AlreadyGone;
    for network in networks {
        match runtime.remove_network(&network.id) {
            Ok(()) => {
                on_removed(&network.id);
                tracing::debug!(network_id = id, "removed network");
                outcome = RemovalOutcome::Removed;
            }
            Err(report) if is_not_found(&report) => {
                tracing::trace!(network_id = id, "network disappeared before removal");
            }
            Err(report) => {
                log_failure(
                    &report,
                    Severity::Trace,
                    "error removing network; it may not have been removed",
                    &network.name,
                );
                outcome = RemovalOutcome::RemoveFailed;
            }
        }
    }
    outcome
}

/// Force-removes the image `name`.
pub fn remove_image(runtime: &dyn ContainerRuntime, name: &str) -> RemovalOutcome {
    tracing::trace!(image = name, "removing image");
    match runtime.remove_image(name, true) {
        Ok(()) => RemovalOutcome::Removed,
        Err(report) if is_not_found(&report) => {
            tracing::trace!(image = name, "image already removed");
            RemovalOutcome::AlreadyGone
        }
        Err(report) => {
            log_failure(&report, Severity::Warn, "unable to delete image", name);
            RemovalOutcome::RemoveFailed
        }
    }
}
