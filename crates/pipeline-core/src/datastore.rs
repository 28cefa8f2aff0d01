use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::grouping::{column_order, palette_color};
use crate::opportunity::{Opportunity, OpportunityPatch};
use crate::store::{OpportunityStore, PreferenceStore, ViewStore};
use crate::view::{Column, CustomView, NewCustomView};

/// File-backed opportunity and view store: one JSON record per line,
/// rewritten atomically on every change.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub opportunities_path: PathBuf,
    pub views_path: PathBuf,
    fiscal_year_start_month: u32,
    write_lock: Mutex<()>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path, fiscal_year_start_month: u32) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let opportunities_path = data_dir.join("opportunities.data");
        let views_path = data_dir.join("views.data");

        if !opportunities_path.exists() {
            fs::write(&opportunities_path, "")?;
        }
        if !views_path.exists() {
            fs::write(&views_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            opportunities = %opportunities_path.display(),
            views = %views_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            opportunities_path,
            views_path,
            fiscal_year_start_month,
            write_lock: Mutex::new(()),
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_opportunities(&self) -> anyhow::Result<Vec<Opportunity>> {
        load_jsonl(&self.opportunities_path).context("failed to load opportunities.data")
    }

    #[tracing::instrument(skip(self, opportunities))]
    pub fn save_opportunities(&self, opportunities: &[Opportunity]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.opportunities_path, opportunities)
            .context("failed to save opportunities.data")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_views(&self) -> anyhow::Result<Vec<CustomView>> {
        load_jsonl(&self.views_path).context("failed to load views.data")
    }

    #[tracing::instrument(skip(self, views))]
    pub fn save_views(&self, views: &[CustomView]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.views_path, views).context("failed to save views.data")
    }

    /// Inserts new records and replaces existing ones with the same id.
    #[tracing::instrument(skip(self, incoming), fields(count = incoming.len()))]
    pub fn upsert_opportunities(&self, incoming: Vec<Opportunity>) -> anyhow::Result<usize> {
        let _guard = self.write_lock.lock();
        let mut current = self.load_opportunities()?;
        let count = incoming.len();

        for mut opp in incoming {
            opp.refresh_quarter(self.fiscal_year_start_month);
            match current.iter_mut().find(|existing| existing.id == opp.id) {
                Some(existing) => *existing = opp,
                None => current.push(opp),
            }
        }

        self.save_opportunities(&current)?;
        Ok(count)
    }

    fn update_sync(&self, id: Uuid, patch: &OpportunityPatch) -> anyhow::Result<Opportunity> {
        let _guard = self.write_lock.lock();
        let mut opportunities = self.load_opportunities()?;

        let updated = {
            let opp = opportunities
                .iter_mut()
                .find(|opp| opp.id == id)
                .ok_or_else(|| anyhow!("opportunity not found: {id}"))?;
            opp.apply_patch(patch, self.fiscal_year_start_month);
            opp.clone()
        };

        self.save_opportunities(&opportunities)?;
        Ok(updated)
    }

    fn set_active_flags(&self, active: Option<Uuid>) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock();
        let mut views = self.load_views()?;

        if let Some(id) = active
            && !views.iter().any(|view| view.id == id)
        {
            return Err(anyhow!("custom view not found: {id}"));
        }

        for view in &mut views {
            view.is_active = Some(view.id) == active;
        }

        // One rewrite of views.data flips every flag together.
        self.save_views(&views)
    }

    fn create_custom_sync(&self, spec: NewCustomView) -> anyhow::Result<CustomView> {
        let _guard = self.write_lock.lock();
        let mut views = self.load_views()?;

        let requested = spec.name.trim();
        if requested.is_empty() {
            return Err(anyhow!("custom view name cannot be empty"));
        }

        let titles: Vec<&str> = spec
            .column_titles
            .iter()
            .map(|title| title.trim())
            .filter(|title| !title.is_empty())
            .collect();
        if titles.is_empty() {
            return Err(anyhow!("custom view needs at least one column"));
        }

        let columns = titles
            .into_iter()
            .enumerate()
            .map(|(index, title)| {
                Column::new(Uuid::new_v4().to_string(), title, column_order(index))
                    .with_color(palette_color(index))
            })
            .collect();

        if spec.is_default {
            for view in &mut views {
                view.is_default = false;
            }
        }

        let view = CustomView {
            id: Uuid::new_v4(),
            name: unique_view_name(&views, requested),
            columns,
            is_default: spec.is_default,
            is_active: false,
        };

        info!(id = %view.id, name = %view.name, "creating custom view");
        views.push(view.clone());
        self.save_views(&views)?;
        Ok(view)
    }
}

#[async_trait]
impl OpportunityStore for DataStore {
    async fn list(&self) -> anyhow::Result<Vec<Opportunity>> {
        self.load_opportunities()
    }

    #[tracing::instrument(skip(self, patch), fields(id = %id))]
    async fn update(&self, id: Uuid, patch: OpportunityPatch) -> anyhow::Result<Opportunity> {
        self.update_sync(id, &patch)
    }
}

#[async_trait]
impl ViewStore for DataStore {
    async fn list(&self) -> anyhow::Result<Vec<CustomView>> {
        self.load_views()
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    async fn activate_custom(&self, id: Uuid) -> anyhow::Result<()> {
        self.set_active_flags(Some(id))
    }

    #[tracing::instrument(skip(self))]
    async fn deactivate_all_custom(&self) -> anyhow::Result<()> {
        self.set_active_flags(None)
    }

    #[tracing::instrument(skip(self, spec), fields(name = %spec.name))]
    async fn create_custom(&self, spec: NewCustomView) -> anyhow::Result<CustomView> {
        self.create_custom_sync(spec)
    }
}

fn unique_view_name(views: &[CustomView], requested: &str) -> String {
    let taken: BTreeSet<String> = views
        .iter()
        .map(|view| view.name.trim().to_ascii_lowercase())
        .collect();

    if !taken.contains(&requested.to_ascii_lowercase()) {
        return requested.to_string();
    }

    (2_usize..)
        .map(|n| format!("{requested} ({n})"))
        .find(|candidate| !taken.contains(&candidate.to_ascii_lowercase()))
        .unwrap_or_else(|| requested.to_string())
}

/// Preferences kept as one JSON object in `preferences.json`.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
}

impl FilePreferences {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let path = data_dir.join("preferences.json");
        let map = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("failed parsing {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        debug!(file = %path.display(), count = map.len(), "loaded preferences");
        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    fn persist(&self, map: &BTreeMap<String, String>) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, map)?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.path.display(), err))?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut map = self.map.lock();
        map.insert(key.to_string(), value.to_string());
        self.persist(&map)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut map = self.map.lock();
        if map.remove(key).is_some() {
            self.persist(&map)?;
        }
        Ok(())
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for record in records {
        let serialized = serde_json::to_string(record)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
