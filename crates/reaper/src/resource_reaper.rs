//! Entry point for registering resources for cleanup.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use api_types::FilterError;
use api_types::FilterSet;
use api_types::ResourceKind;
use watchdog::TcpWatchdog;
use watchdog::Watchdog;
use watchdog::WatchdogConfig;
use watchdog::WatchdogError;

use crate::config::ReaperConfig;
use crate::death_note::DeathNote;
use crate::hook::AtExitHook;
use crate::hook::ExitHook;
use crate::registry::ResourceRegistry;
use crate::removal;
use crate::removal::RemovalOutcome;
use crate::runtime::ContainerRuntime;
use crate::shutdown;

/// Tracks the resources this process owns and makes sure they are removed.
///
/// Cheap to clone; clones share the same registry, death note and latches.
/// The first registration installs an exit hook which drains the registry
/// and, unless a watchdog took over, sweeps everything matching the death
/// note's label filters.
///
/// The installed callback keeps the context alive until it runs, so exit
/// cleanup happens even after every handle is dropped. With a
/// [`ManualExitHook`](crate::hook::ManualExitHook) that means the context
/// lives until the hook is fired or its callbacks are discarded.
#[derive(Clone)]
pub struct ResourceReaper {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Arc<dyn ContainerRuntime>,
    exit_hook: Arc<dyn ExitHook>,
    registry: ResourceRegistry,
    death_note: DeathNote,
    default_labels: BTreeMap<String, String>,
    default_filters: FilterSet,
    watchdog_config: WatchdogConfig,
    hook_installed: AtomicBool,
    watchdog_started: AtomicBool,
    /// Kept open for as long as we live; the watchdog reaps once it closes.
    watchdog: Mutex<Option<Box<dyn Watchdog + Send>>>,
    cleanup_lock: Mutex<()>,
}

impl ResourceReaper {
    /// Creates a reaper whose exit work runs from an `atexit` handler.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: &ReaperConfig,
    ) -> Result<Self, FilterError> {
        Self::with_exit_hook(runtime, Arc::new(AtExitHook), config)
    }

    /// Creates a reaper using `exit_hook` as the termination facility.
    ///
    /// Fails if the configured default labels cannot form a label filter.
    pub fn with_exit_hook(
        runtime: Arc<dyn ContainerRuntime>,
        exit_hook: Arc<dyn ExitHook>,
        config: &ReaperConfig,
    ) -> Result<Self, FilterError> {
        let default_filters = FilterSet::from_labels(&config.default_labels)?;
        Ok(Self {
            inner: Arc::new(Inner {
                runtime,
                exit_hook,
                registry: ResourceRegistry::new(),
                death_note: DeathNote::new(default_filters.clone()),
                default_labels: config.default_labels.clone(),
                default_filters,
                watchdog_config: config.watchdog.clone(),
                hook_installed: AtomicBool::new(false),
                watchdog_started: AtomicBool::new(false),
                watchdog: Mutex::new(None),
                cleanup_lock: Mutex::new(()),
            }),
        })
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.inner.registry
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        &*self.inner.runtime
    }

    pub(crate) fn death_note(&self) -> &DeathNote {
        &self.inner.death_note
    }

    /// Labels to stamp on every resource this process creates.
    pub fn default_labels(&self) -> &BTreeMap<String, String> {
        &self.inner.default_labels
    }

    pub fn death_note_len(&self) -> usize {
        self.inner.death_note.len()
    }

    /// Registers a container to be removed on explicit request or at exit.
    ///
    /// `label` (usually the image name) only shows up in logs.
    pub fn register_container(&self, id: impl Into<String>, label: impl Into<String>) {
        self.ensure_exit_hook();
        self.inner.registry.insert_container(id, label);
    }

    pub fn register_network(&self, id: impl Into<String>) {
        self.ensure_exit_hook();
        self.inner.registry.insert_network(id);
    }

    pub fn register_image(&self, name: impl Into<String>) {
        self.ensure_exit_hook();
        self.inner.registry.insert_image(name);
    }

    /// Forgets a container without removing it; the caller owns it from now on.
    pub fn unregister_container(&self, id: &str) {
        self.inner.registry.remove_container(id);
    }

    /// Forgets a network without removing it.
    pub fn unregister_network(&self, id: &str) {
        self.inner.registry.remove_network(id);
    }

    /// Stops and removes a container together with its volumes.
    ///
    /// `label` defaults to the one given at registration. The container is
    /// unregistered whatever the outcome.
    pub fn stop_and_remove_container(&self, id: &str, label: Option<&str>) -> RemovalOutcome {
        let registered = self.inner.registry.container_label(id);
        let label = label.or(registered.as_deref());
        let outcome = removal::remove_container(self.runtime(), id, label);
        self.inner.registry.remove_container(id);
        outcome
    }

    /// Removes a network by ID and unregisters it, even if removal failed.
    pub fn remove_network_by_id(&self, id: &str) -> RemovalOutcome {
        let registry = &self.inner.registry;
        let _slot = registry.network_slot(id);
        removal::remove_network(self.runtime(), id, |removed| {
            registry.remove_network(removed);
        })
    }

    fn remove_image(&self, name: &str) -> RemovalOutcome {
        let outcome = removal::remove_image(self.runtime(), name);
        self.inner.registry.remove_image(name);
        outcome
    }

    /// Removes everything registered when the call starts.
    ///
    /// Registrations made during the drain are left for the next one. Never
    /// fails; problems are logged.
    pub fn cleanup_all(&self) {
        let _guard = self
            .inner
            .cleanup_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let snapshot = self.inner.registry.snapshot();
        if snapshot.is_empty() {
            tracing::trace!("nothing registered for cleanup");
            return;
        }
        tracing::debug!(count = snapshot.len(), "cleaning up registered resources");

        for registration in snapshot {
            let outcome = match registration.kind {
                ResourceKind::Container => {
                    self.stop_and_remove_container(&registration.id, Some(registration.label.as_str()))
                }
                ResourceKind::Network => self.remove_network_by_id(&registration.id),
                ResourceKind::Image => self.remove_image(&registration.id),
            };
            tracing::trace!(kind = %registration.kind, id = %registration.id, ?outcome, "cleanup step finished");
        }
    }

    /// Adds a filter set to sweep at exit when no watchdog is running.
    pub fn register_filter_set(&self, filters: FilterSet) {
        self.inner.death_note.push(filters);
    }

    /// Adds a label filter set to sweep at exit when no watchdog is running.
    pub fn register_label_filter_set<'a, I>(&self, labels: I) -> Result<(), FilterError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let filters = FilterSet::from_labels(labels)?;
        self.register_filter_set(filters);
        Ok(())
    }

    /// Records that a watchdog is looking after this process. Cannot be undone.
    pub fn mark_watchdog_started(&self) {
        self.inner.watchdog_started.store(true, Ordering::SeqCst);
    }

    pub fn watchdog_started(&self) -> bool {
        self.inner.watchdog_started.load(Ordering::SeqCst)
    }

    /// Connects to the watchdog at `addr` and hands it the default labels.
    ///
    /// Returns whether the watchdog acknowledged. On failure the local
    /// fallback stays armed.
    pub fn start_watchdog(&self, addr: &str) -> Result<bool, WatchdogError> {
        let watchdog = TcpWatchdog::connect_tcp(addr, &self.inner.watchdog_config)?;
        self.attach_watchdog(Box::new(watchdog))
    }

    /// Registers the default labels over an already open watchdog connection.
    ///
    /// On acknowledgment the connection is kept for the life of this context.
    pub fn attach_watchdog(&self, watchdog: Box<dyn Watchdog + Send>) -> Result<bool, WatchdogError> {
        let acknowledged = watchdog.register(&self.inner.default_filters)?;
        if acknowledged {
            *self
                .inner
                .watchdog
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(watchdog);
            self.mark_watchdog_started();
            tracing::info!("watchdog acknowledged default labels; exit-time prune disabled");
        } else {
            tracing::warn!("watchdog closed the connection without acknowledging; keeping local cleanup");
        }
        Ok(acknowledged)
    }

    /// Prunes containers, networks, volumes and images matching `filters`.
    pub fn prune_filter_set(&self, filters: &FilterSet) {
        shutdown::prune_all_kinds(self.runtime(), filters);
    }

    /// Work done at process exit. Public for hosts that drive shutdown themselves.
    pub fn run_exit_cleanup(&self) {
        shutdown::run(self);
    }

    fn ensure_exit_hook(&self) {
        if self
            .inner
            .hook_installed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reaper = self.clone();
            self.inner
                .exit_hook
                .install(Box::new(move || reaper.run_exit_cleanup()));
            tracing::debug!("installed exit cleanup hook");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use api_types::FilterClause;
    use similar_asserts::assert_eq;
    use test_log::test;
    use watchdog::StreamWatchdog;

    use super::*;
    use crate::hook::ManualExitHook;
    use crate::runtime::mock::MockRuntime;
    use crate::runtime::mock::RuntimeCall;

    fn reaper_with(runtime: Arc<MockRuntime>) -> (ResourceReaper, Arc<ManualExitHook>) {
        let hook = Arc::new(ManualExitHook::new());
        let reaper =
            ResourceReaper::with_exit_hook(runtime, hook.clone(), &ReaperConfig::default())
                .expect("default labels are valid");
        (reaper, hook)
    }

    #[test]
    fn hook_is_installed_lazily_once() {
        let (reaper, hook) = reaper_with(Arc::new(MockRuntime::new()));
        assert_eq!(hook.install_count(), 0);

        reaper.register_container("c1", "img");
        reaper.register_network("n1");
        reaper.register_image("img");

        assert_eq!(hook.install_count(), 1);
    }

    #[test]
    fn unregister_does_not_touch_the_runtime() {
        let runtime = Arc::new(MockRuntime::new());
        let (reaper, _hook) = reaper_with(runtime.clone());
        reaper.register_container("c1", "img");
        reaper.register_network("n1");

        reaper.unregister_container("c1");
        reaper.unregister_network("n1");

        assert!(reaper.registry().is_empty());
        assert!(runtime.calls().is_empty());
    }

    #[test]
    fn explicit_label_wins_over_registered_one() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_container("c1", "img", false);
        let (reaper, _hook) = reaper_with(runtime.clone());
        reaper.register_container("c1", "img");

        let outcome = reaper.stop_and_remove_container("c1", Some("other"));

        assert_eq!(outcome, RemovalOutcome::Removed);
        assert!(!reaper.registry().contains_container("c1"));
    }

    #[test]
    fn empty_label_key_is_rejected_at_registration() {
        let (reaper, _hook) = reaper_with(Arc::new(MockRuntime::new()));
        let labels = BTreeMap::from([(String::new(), "x".to_string())]);

        assert!(reaper.register_label_filter_set(&labels).is_err());
        assert_eq!(reaper.death_note_len(), 1);
    }

    #[test]
    fn label_filter_sets_are_appended() {
        let (reaper, _hook) = reaper_with(Arc::new(MockRuntime::new()));
        let labels = BTreeMap::from([("app".to_string(), "db".to_string())]);

        reaper.register_label_filter_set(&labels).unwrap();
        reaper.register_filter_set(
            FilterSet::new().with_clause(FilterClause::label("team", "blue").unwrap()),
        );

        assert_eq!(reaper.death_note_len(), 3);
    }

    #[test]
    fn invalid_default_labels_fail_construction() {
        let config = ReaperConfig::new().with_label("", "x");
        let result = ResourceReaper::with_exit_hook(
            Arc::new(MockRuntime::new()),
            Arc::new(ManualExitHook::new()),
            &config,
        );
        assert!(result.is_err());
    }

    #[test]
    fn acknowledged_watchdog_sets_the_latch() {
        let (reaper, _hook) = reaper_with(Arc::new(MockRuntime::new()));
        let watchdog = StreamWatchdog::new(Cursor::new(b"ACK\n".to_vec()), Vec::new());

        assert!(reaper.attach_watchdog(Box::new(watchdog)).unwrap());
        assert!(reaper.watchdog_started());
    }

    #[test]
    fn silent_watchdog_leaves_fallback_armed() {
        let (reaper, _hook) = reaper_with(Arc::new(MockRuntime::new()));
        let watchdog = StreamWatchdog::new(Cursor::new(Vec::new()), Vec::new());

        assert!(!reaper.attach_watchdog(Box::new(watchdog)).unwrap());
        assert!(!reaper.watchdog_started());
    }

    #[test]
    fn unreachable_watchdog_is_an_error() {
        let (reaper, _hook) = reaper_with(Arc::new(MockRuntime::new()));
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        assert!(reaper.start_watchdog(&addr).is_err());
        assert!(!reaper.watchdog_started());
    }

    #[test]
    fn discarded_hook_releases_the_context() {
        let runtime = Arc::new(MockRuntime::new());
        let (reaper, hook) = reaper_with(runtime.clone());
        reaper.register_network("n1");
        drop(reaper);

        // runtime is shared with the context still held by the callback
        assert_eq!(Arc::strong_count(&runtime), 2);

        hook.discard();

        assert_eq!(Arc::strong_count(&runtime), 1);
        assert!(runtime.calls().is_empty());
    }

    #[test]
    fn fired_hook_releases_the_context() {
        let runtime = Arc::new(MockRuntime::new());
        let (reaper, hook) = reaper_with(runtime.clone());
        reaper.register_network("n1");
        drop(reaper);

        hook.fire();

        assert_eq!(Arc::strong_count(&runtime), 1);
        assert_eq!(
            runtime.count_calls(|call| matches!(call, RuntimeCall::ListNetworks(_))),
            1
        );
    }

    #[test]
    fn exit_hook_runs_the_drain() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_container("c1", "img", true);
        let (reaper, hook) = reaper_with(runtime.clone());
        reaper.register_container("c1", "img");

        hook.fire();

        assert!(reaper.registry().is_empty());
        assert!(!runtime.has_container("c1"));
        assert!(runtime
            .calls()
            .iter()
            .any(|call| matches!(call, RuntimeCall::Prune { .. })));
    }
}
