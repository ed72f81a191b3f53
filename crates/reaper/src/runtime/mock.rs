//! Scriptable in-memory runtime for tests.
//!
//! The mock keeps a tiny model of containers, networks and images, records
//! every call it receives and can be told to fail specific operations.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use api_types::ResourceKind;
use error_stack::Report;

use super::ContainerRuntime;
use super::ContainerState;
use super::ContainerSummary;
use super::NetworkSummary;
use super::PruneKind;
use super::RemoveOptions;
use super::RuntimeError;
use super::RuntimeResult;

/// Operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Inspect,
    Kill,
    Remove,
    ListContainers,
    ListNetworks,
    RemoveNetwork,
    RemoveImage,
    Prune,
}

/// A call received by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Inspect(String),
    Kill(String),
    Remove { id: String, options: RemoveOptions },
    ListContainers(Vec<String>),
    ListNetworks(String),
    RemoveNetwork(String),
    RemoveImage { name: String, force: bool },
    Prune { kind: PruneKind, labels: Vec<String> },
}

#[derive(Debug, Clone)]
struct MockContainer {
    image: String,
    running: bool,
    labels: BTreeMap<String, String>,
}

type InspectHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct MockRuntime {
    containers: Mutex<HashMap<String, MockContainer>>,
    networks: Mutex<HashMap<String, String>>,
    images: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<MockOp, RuntimeError>>,
    calls: Mutex<Vec<RuntimeCall>>,
    before_inspect: Mutex<Option<InspectHook>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&self, id: &str, image: &str, running: bool) {
        self.add_labeled_container(id, image, running, &[]);
    }

    pub fn add_labeled_container(
        &self,
        id: &str,
        image: &str,
        running: bool,
        labels: &[(&str, &str)],
    ) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        lock(&self.containers).insert(
            id.to_string(),
            MockContainer {
                image: image.to_string(),
                running,
                labels,
            },
        );
    }

    pub fn add_network(&self, id: &str, name: &str) {
        lock(&self.networks).insert(id.to_string(), name.to_string());
    }

    pub fn add_image(&self, name: &str) {
        lock(&self.images).insert(name.to_string());
    }

    /// Makes every subsequent `op` fail with `error` until [`Self::clear_failure`].
    pub fn fail_on(&self, op: MockOp, error: RuntimeError) {
        lock(&self.failures).insert(op, error);
    }

    pub fn clear_failure(&self, op: MockOp) {
        lock(&self.failures).remove(&op);
    }

    /// Runs `hook` with the container ID at the start of every inspect call.
    pub fn before_inspect(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *lock(&self.before_inspect) = Some(Arc::new(hook));
    }

    pub fn has_container(&self, id: &str) -> bool {
        lock(&self.containers).contains_key(id)
    }

    pub fn has_network(&self, id: &str) -> bool {
        lock(&self.networks).contains_key(id)
    }

    pub fn has_image(&self, name: &str) -> bool {
        lock(&self.images).contains(name)
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: RuntimeCall) {
        lock(&self.calls).push(call);
    }

    fn check(&self, op: MockOp) -> RuntimeResult<()> {
        match lock(&self.failures).get(&op) {
            Some(error) => Err(Report::new(error.clone()).attach_printable("injected by MockRuntime")),
            None => Ok(()),
        }
    }

    fn matches_labels(container: &MockContainer, label_filters: &[String]) -> bool {
        label_filters.iter().all(|filter| {
            let (key, value) = filter.split_once('=').unwrap_or((filter.as_str(), ""));
            container.labels.get(key).is_some_and(|v| v == value)
        })
    }
}

impl ContainerRuntime for MockRuntime {
    fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerState> {
        let hook = lock(&self.before_inspect).clone();
        if let Some(hook) = hook {
            hook(id);
        }
        self.record(RuntimeCall::Inspect(id.to_string()));
        self.check(MockOp::Inspect)?;
        match lock(&self.containers).get(id) {
            Some(container) => Ok(ContainerState {
                running: container.running,
                status: if container.running { "running" } else { "exited" }.to_string(),
            }),
            None => Err(Report::new(RuntimeError::not_found(ResourceKind::Container, id))),
        }
    }

    fn kill_container(&self, id: &str) -> RuntimeResult<()> {
        self.record(RuntimeCall::Kill(id.to_string()));
        self.check(MockOp::Kill)?;
        match lock(&self.containers).get_mut(id) {
            Some(container) => {
                container.running = false;
                Ok(())
            }
            None => Err(Report::new(RuntimeError::not_found(ResourceKind::Container, id))),
        }
    }

    fn remove_container(&self, id: &str, options: RemoveOptions) -> RuntimeResult<()> {
        self.record(RuntimeCall::Remove {
            id: id.to_string(),
            options,
        });
        self.check(MockOp::Remove)?;
        let mut containers = lock(&self.containers);
        match containers.get(id) {
            None => Err(Report::new(RuntimeError::not_found(ResourceKind::Container, id))),
            Some(container) if container.running && !options.force => Err(Report::new(
                RuntimeError::transport("rm", format!("container {id} is running")),
            )),
            Some(_) => {
                containers.remove(id);
                Ok(())
            }
        }
    }

    fn list_containers(&self, label_filters: &[String]) -> RuntimeResult<Vec<ContainerSummary>> {
        self.record(RuntimeCall::ListContainers(label_filters.to_vec()));
        self.check(MockOp::ListContainers)?;
        let mut containers: Vec<_> = lock(&self.containers)
            .iter()
            .filter(|(_, c)| Self::matches_labels(c, label_filters))
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                image: c.image.clone(),
            })
            .collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(containers)
    }

    fn list_networks_by_id(&self, id: &str) -> RuntimeResult<Vec<NetworkSummary>> {
        self.record(RuntimeCall::ListNetworks(id.to_string()));
        self.check(MockOp::ListNetworks)?;
        Ok(lock(&self.networks)
            .get(id)
            .map(|name| NetworkSummary {
                id: id.to_string(),
                name: name.clone(),
            })
            .into_iter()
            .collect())
    }

    fn remove_network(&self, id: &str) -> RuntimeResult<()> {
        self.record(RuntimeCall::RemoveNetwork(id.to_string()));
        self.check(MockOp::RemoveNetwork)?;
        match lock(&self.networks).remove(id) {
            Some(_) => Ok(()),
            None => Err(Report::new(RuntimeError::not_found(ResourceKind::Network, id))),
        }
    }

    fn remove_image(&self, name: &str, force: bool) -> RuntimeResult<()> {
        self.record(RuntimeCall::RemoveImage {
            name: name.to_string(),
            force,
        });
        self.check(MockOp::RemoveImage)?;
        if lock(&self.images).remove(name) {
            Ok(())
        } else {
            Err(Report::new(RuntimeError::not_found(ResourceKind::Image, name)))
        }
    }

    fn prune(&self, kind: PruneKind, label_filters: &[String]) -> RuntimeResult<()> {
        self.record(RuntimeCall::Prune {
            kind,
            labels: label_filters.to_vec(),
        });
        self.check(MockOp::Prune)
    }
}
