//! Exit-time work: drain the registry, then sweep by label unless a watchdog
//! is looking after us.

use api_types::FilterSet;
use rayon::prelude::*;

use crate::removal;
use crate::removal::swallow;
use crate::removal::Severity;
use crate::runtime::ContainerRuntime;
use crate::runtime::PruneKind;
use crate::ResourceReaper;

pub(crate) fn run(reaper: &ResourceReaper) {
    tracing::debug!("running exit cleanup");
    reaper.cleanup_all();

    if reaper.watchdog_started() {
        tracing::debug!("watchdog is running; skipping label prune");
        return;
    }

    let runtime = reaper.runtime();
    // One kind at a time across every filter set: containers have to go
    // before the networks and volumes they hold on to.
    reaper.death_note().with_entries(|entries| {
        for kind in PruneKind::ALL {
            for filters in entries {
                prune(runtime, kind, filters);
            }
        }
    });
}

pub(crate) fn prune_all_kinds(runtime: &dyn ContainerRuntime, filters: &FilterSet) {
    for kind in PruneKind::ALL {
        prune(runtime, kind, filters);
    }
}

/// Removes every resource of `kind` carrying all labels in `filters`.
pub(crate) fn prune(runtime: &dyn ContainerRuntime, kind: PruneKind, filters: &FilterSet) {
    let labels = filters.label_values();
    if labels.is_empty() {
        // An unfiltered prune would hit resources that are not ours.
        tracing::warn!(%kind, "refusing to prune without label filters");
        return;
    }
    tracing::trace!(%kind, ?labels, "pruning");

    match kind {
        PruneKind::Containers => {
            let Some(containers) = swallow(
                runtime.list_containers(&labels),
                Severity::Warn,
                "failed to list containers for pruning",
                &labels.join(","),
            ) else {
                return;
            };
            containers.par_iter().for_each(|container| {
                removal::remove_container(runtime, &container.id, Some(container.image.as_str()));
            });
        }
        _ => {
            swallow(
                runtime.prune(kind, &labels),
                Severity::Warn,
                "failed to prune resources",
                &kind.to_string(),
            );
        }
    }
}
