use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::scheduler::handle::ResourceHandle;
use crate::tool::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Active,
    Paused,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Active => write!(f, "active"),
            ResourceStatus::Paused => write!(f, "paused"),
        }
    }
}

/// A connected agent and the slots it has in use.
pub struct Resource {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub status: ResourceStatus,
    pub hardware: BTreeMap<String, bool>,
    /// Queue-level tool id -> the tool as this resource advertises it.
    pub tools: HashMap<Uuid, Tool>,
    /// Hardware tag -> job holding that slot.
    pub running: HashMap<String, Uuid>,
    pub handle: Arc<dyn ResourceHandle>,
}

impl Resource {
    /// Whether the slot for `tag` exists and is free.
    pub fn slot_free(&self, tag: &str) -> bool {
        self.hardware.get(tag).copied().unwrap_or(false) && !self.running.contains_key(tag)
    }
}

/// Serializable snapshot of a [`Resource`].
#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub status: ResourceStatus,
    pub hardware: BTreeMap<String, bool>,
    pub tools: Vec<Tool>,
    pub running_jobs: Vec<Uuid>,
}

/// Registered resources plus the de-duplicated catalog of tools they offer.
#[derive(Default)]
pub struct ResourcePool {
    resources: Vec<Resource>,
    catalog: HashMap<Uuid, Tool>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address_taken(&self, address: &str) -> bool {
        self.resources.iter().any(|r| r.address == address)
    }

    /// Register a resource. Tools equal to one already in the catalog are
    /// exposed under the existing queue-level id.
    pub fn register(
        &mut self,
        name: String,
        address: String,
        hardware: BTreeMap<String, bool>,
        advertised: Vec<Tool>,
        handle: Arc<dyn ResourceHandle>,
    ) -> Uuid {
        let mut tools = HashMap::new();
        for local in advertised {
            let queue_id = match self
                .catalog
                .values()
                .find(|known| known.same_offering(&local))
            {
                Some(known) => known.id,
                None => {
                    self.catalog.insert(local.id, local.clone());
                    local.id
                }
            };
            tools.insert(queue_id, local);
        }

        let id = Uuid::new_v4();
        self.resources.push(Resource {
            id,
            name,
            address,
            status: ResourceStatus::Active,
            hardware,
            tools,
            running: HashMap::new(),
            handle,
        });
        id
    }

    /// Remove a resource and drop catalog entries nobody offers any more.
    pub fn remove(&mut self, id: Uuid) -> Option<Resource> {
        let pos = self.resources.iter().position(|r| r.id == id)?;
        let resource = self.resources.remove(pos);
        let resources = &self.resources;
        self.catalog
            .retain(|tool_id, _| resources.iter().any(|r| r.tools.contains_key(tool_id)));
        Some(resource)
    }

    pub fn get(&self, id: Uuid) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn has_tool(&self, tool_id: Uuid) -> bool {
        self.catalog.contains_key(&tool_id)
    }

    pub fn tool(&self, tool_id: Uuid) -> Option<&Tool> {
        self.catalog.get(&tool_id)
    }

    pub fn tools(&self) -> HashMap<Uuid, Tool> {
        self.catalog.clone()
    }

    /// Distinct tool types on offer, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.catalog.values().map(|t| t.kind.clone()).collect();
        types.sort();
        types.dedup();
        types
    }

    /// First active resource, in registration order, that offers `tool_id`
    /// and has its requirement slot free. Returns the resource id and the
    /// tool as that resource knows it.
    pub fn find_slot(&self, tool_id: Uuid) -> Option<(Uuid, &Tool)> {
        self.resources
            .iter()
            .filter(|r| r.status == ResourceStatus::Active)
            .find_map(|r| {
                let local = r.tools.get(&tool_id)?;
                r.slot_free(&local.requirement).then_some((r.id, local))
            })
    }

    pub fn occupy(&mut self, resource_id: Uuid, tag: &str, job_id: Uuid) {
        if let Some(resource) = self.get_mut(resource_id) {
            resource.running.insert(tag.to_string(), job_id);
        }
    }

    /// Free whatever slot `job_id` holds, on any resource.
    pub fn release(&mut self, job_id: Uuid) {
        for resource in &mut self.resources {
            resource.running.retain(|_, running| *running != job_id);
        }
    }

    pub fn info(&self, resource: &Resource) -> ResourceInfo {
        let mut tools: Vec<Tool> = resource
            .tools
            .keys()
            .filter_map(|id| self.catalog.get(id).cloned())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        ResourceInfo {
            id: resource.id,
            name: resource.name.clone(),
            address: resource.address.clone(),
            status: resource.status,
            hardware: resource.hardware.clone(),
            tools,
            running_jobs: resource.running.values().copied().collect(),
        }
    }

    pub fn infos(&self) -> Vec<ResourceInfo> {
        self.resources.iter().map(|r| self.info(r)).collect()
    }
}
