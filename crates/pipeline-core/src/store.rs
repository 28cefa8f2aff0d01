use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::opportunity::{Opportunity, OpportunityPatch};
use crate::view::{CustomView, NewCustomView};

/// Preference key holding the last chosen built-in view.
pub const BUILT_IN_VIEW_KEY: &str = "pipeline.view.builtin";
/// Preference key for the quarterly "show all quarters" toggle.
pub const SHOW_ALL_QUARTERS_KEY: &str = "pipeline.quarterly.show_all";

/// Authoritative opportunity records.
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<Opportunity>>;

    /// Applies `patch` and returns the stored record.
    async fn update(&self, id: Uuid, patch: OpportunityPatch) -> anyhow::Result<Opportunity>;
}

/// Persisted custom views. Built-in views are never stored.
#[async_trait]
pub trait ViewStore: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<CustomView>>;

    /// Marks `id` active and every sibling inactive in one write.
    async fn activate_custom(&self, id: Uuid) -> anyhow::Result<()>;

    async fn deactivate_all_custom(&self) -> anyhow::Result<()>;

    async fn create_custom(&self, spec: NewCustomView) -> anyhow::Result<CustomView>;
}

/// Client-local key/value storage; never a source of truth.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.map.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.map.lock().remove(key);
        Ok(())
    }
}
