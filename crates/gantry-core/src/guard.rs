//! Scoped ownership of engine resources.
//!
//! Every container and network a stage creates is wrapped in a guard whose
//! `Drop` stops and removes it, so early returns through `?` still tear
//! everything down. Live resources are also listed in a shared
//! `ResourceTracker`: a caller enforcing an external timeout can clone the
//! tracker before a blocking stage call and force-remove what it lists.

use gantry_runtime::{ContainerEngine, ContainerSpec, EngineError};
use gantry_schema::{ContainerId, NetworkId};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrackedResource {
    Container(ContainerId),
    Network(NetworkId),
}

impl fmt::Display for TrackedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackedResource::Container(id) => write!(f, "container {id}"),
            TrackedResource::Network(id) => write!(f, "network {id}"),
        }
    }
}

/// Cloneable handle on the set of live containers and networks of one run.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    live: Arc<Mutex<BTreeSet<TrackedResource>>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<TrackedResource>> {
        match self.live.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert(&self, resource: TrackedResource) {
        self.lock().insert(resource);
    }

    pub fn remove(&self, resource: &TrackedResource) {
        self.lock().remove(resource);
    }

    /// Live resources, containers before networks.
    pub fn snapshot(&self) -> Vec<TrackedResource> {
        self.lock().iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every tracked resource, containers first. Returns what is still live.
    pub fn force_cleanup(&self, engine: &dyn ContainerEngine) -> Vec<TrackedResource> {
        for resource in self.snapshot() {
            let removed = match &resource {
                TrackedResource::Container(id) => engine.remove(id),
                TrackedResource::Network(id) => match engine.remove_network(id) {
                    Err(EngineError::NetworkNotFound(_)) => Ok(()),
                    other => other,
                },
            };
            match removed {
                Ok(()) => self.remove(&resource),
                Err(e) => warn!("forced removal of {resource} failed: {e}"),
            }
        }
        self.snapshot()
    }
}

/// A created container, stopped and removed when dropped.
pub struct ContainerGuard<'a> {
    engine: &'a dyn ContainerEngine,
    tracker: ResourceTracker,
    id: ContainerId,
    label: String,
}

impl<'a> ContainerGuard<'a> {
    pub fn create(
        engine: &'a dyn ContainerEngine,
        tracker: &ResourceTracker,
        spec: &ContainerSpec,
    ) -> Result<Self, EngineError> {
        let id = engine.create_container(spec)?;
        tracker.insert(TrackedResource::Container(id.clone()));
        let label = spec
            .name
            .clone()
            .unwrap_or_else(|| spec.image.to_string());
        debug!("created container {id} ({label})");
        Ok(Self {
            engine,
            tracker: tracker.clone(),
            id,
            label,
        })
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.engine.stop(&self.id) {
            debug!("stopping container {} ({}) failed: {e}", self.id, self.label);
        }
        match self.engine.remove(&self.id) {
            Ok(()) => {
                self.tracker
                    .remove(&TrackedResource::Container(self.id.clone()));
                debug!("removed container {} ({})", self.id, self.label);
            }
            Err(e) => warn!(
                "failed to remove container {} ({}): {e}",
                self.id, self.label
            ),
        }
    }
}

/// A created network, removed when dropped. Drop it after every container
/// attached to it.
pub struct NetworkGuard<'a> {
    engine: &'a dyn ContainerEngine,
    tracker: ResourceTracker,
    id: NetworkId,
    name: String,
}

impl<'a> NetworkGuard<'a> {
    pub fn create(
        engine: &'a dyn ContainerEngine,
        tracker: &ResourceTracker,
        name: &str,
    ) -> Result<Self, EngineError> {
        let id = engine.create_network(name)?;
        tracker.insert(TrackedResource::Network(id.clone()));
        debug!("created network {id} ({name})");
        Ok(Self {
            engine,
            tracker: tracker.clone(),
            id,
            name: name.to_owned(),
        })
    }

    pub fn id(&self) -> &NetworkId {
        &self.id
    }
}

impl Drop for NetworkGuard<'_> {
    fn drop(&mut self) {
        match self.engine.remove_network(&self.id) {
            Ok(()) => {
                self.tracker.remove(&TrackedResource::Network(self.id.clone()));
                debug!("removed network {} ({})", self.id, self.name);
            }
            Err(e) => warn!("failed to remove network {} ({}): {e}", self.id, self.name),
        }
    }
}
