//! Fact storage with upsert-by-key merge.
//!
//! A [`BatchWrite`] bundles the rows of one run with the schema growth and
//! the new watermark. Stores apply it all-or-nothing: the batch is validated
//! and merged into a staged copy, and only a fully merged copy replaces the
//! live state. Mutation takes `&mut self`, so writers are serialized.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::ConflictPolicy;
use crate::error::{Result, TimelineError};
use crate::refresh::Watermark;
use crate::schema::AttributeSchema;
use crate::types::{EntityId, FactRow};

/// Whether a batch merges into or replaces the stored rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Overwrite existing keys, insert new ones, leave everything else alone.
    Upsert,
    /// Drop all stored rows, then insert the batch.
    Replace,
}

/// One run's output, committed atomically.
#[derive(Debug, Clone)]
pub struct BatchWrite {
    pub mode: WriteMode,
    pub rows: Vec<FactRow>,
    pub new_attributes: Vec<String>,
    pub watermark: Watermark,
    pub policy: ConflictPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Storage collaborator: keyed upsert, additive column evolution, full scans.
pub trait FactStore {
    fn is_empty(&self) -> bool;

    fn max_fact_date(&self) -> Option<NaiveDate>;

    /// Attribute columns the stored rows may carry.
    fn attributes(&self) -> &AttributeSchema;

    fn watermark(&self) -> Option<&Watermark>;

    /// All rows ordered by `(entity_id, date)`.
    fn scan(&self) -> Vec<FactRow>;

    /// Apply a batch atomically.
    ///
    /// # Errors
    /// `MergeKeyConflict` under [`ConflictPolicy::Reject`], or a storage
    /// error from the backing medium. The store is unchanged on error.
    fn apply(&mut self, batch: BatchWrite) -> Result<UpsertStats>;
}

/// Collapse duplicate keys within one batch according to `policy`.
pub fn dedupe_batch(rows: Vec<FactRow>, policy: ConflictPolicy) -> Result<Vec<FactRow>> {
    let mut keyed: BTreeMap<(EntityId, NaiveDate), FactRow> = BTreeMap::new();
    for row in rows {
        let key = row.key();
        if let Some(prev) = keyed.get(&key) {
            if *prev != row {
                match policy {
                    ConflictPolicy::LastWriteWins => tracing::warn!(
                        entity_id = key.0,
                        date = %key.1,
                        "conflicting rows in batch, keeping the last"
                    ),
                    ConflictPolicy::Reject => {
                        return Err(TimelineError::MergeKeyConflict {
                            entity_id: key.0,
                            date: key.1,
                        })
                    }
                }
            }
        }
        keyed.insert(key, row);
    }
    Ok(keyed.into_values().collect())
}

/// In-memory store keyed by `(entity_id, date)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    rows: BTreeMap<(EntityId, NaiveDate), FactRow>,
    attributes: AttributeSchema,
    watermark: Option<Watermark>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, entity_id: EntityId, date: NaiveDate) -> Option<&FactRow> {
        self.rows.get(&(entity_id, date))
    }

    fn merged(&self, batch: BatchWrite) -> Result<(MemoryStore, UpsertStats)> {
        let rows = dedupe_batch(batch.rows, batch.policy)?;
        let mut staged = self.clone();
        if batch.mode == WriteMode::Replace {
            staged.rows.clear();
        }

        let mut stats = UpsertStats::default();
        for row in rows {
            let key = row.key();
            match staged.rows.get(&key) {
                None => stats.inserted += 1,
                Some(old) if *old == row => stats.unchanged += 1,
                Some(_) => stats.updated += 1,
            }
            staged.rows.insert(key, row);
        }
        staged.attributes = staged.attributes.extended_with(&batch.new_attributes);
        staged.watermark = Some(batch.watermark);
        Ok((staged, stats))
    }

    fn to_document(&self) -> StoreDocument {
        StoreDocument {
            attributes: self.attributes.clone(),
            watermark: self.watermark.clone(),
            rows: self.rows.values().cloned().collect(),
        }
    }

    fn from_document(doc: StoreDocument) -> Self {
        Self {
            rows: doc.rows.into_iter().map(|r| (r.key(), r)).collect(),
            attributes: doc.attributes,
            watermark: doc.watermark,
        }
    }
}

impl FactStore for MemoryStore {
    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn max_fact_date(&self) -> Option<NaiveDate> {
        self.rows.keys().map(|(_, date)| *date).max()
    }

    fn attributes(&self) -> &AttributeSchema {
        &self.attributes
    }

    fn watermark(&self) -> Option<&Watermark> {
        self.watermark.as_ref()
    }

    fn scan(&self) -> Vec<FactRow> {
        self.rows.values().cloned().collect()
    }

    fn apply(&mut self, batch: BatchWrite) -> Result<UpsertStats> {
        let (staged, stats) = self.merged(batch)?;
        *self = staged;
        Ok(stats)
    }
}

/// On-disk layout of a [`JsonFileStore`].
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    attributes: AttributeSchema,
    watermark: Option<Watermark>,
    rows: Vec<FactRow>,
}

/// A [`MemoryStore`] persisted as one JSON document.
///
/// Commits write a sibling temporary file and rename it over the target, so
/// readers see either the previous or the new state.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let text = fs::read_to_string(&path)?;
            let doc: StoreDocument = serde_json::from_str(&text)?;
            MemoryStore::from_document(doc)
        } else {
            MemoryStore::new()
        };
        tracing::debug!(path = %path.display(), rows = inner.len(), "fact store opened");
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    fn persist(&self, staged: &MemoryStore) -> Result<()> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| TimelineError::Storage(format!("not a file path: {}", self.path.display())))?;
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        let json = serde_json::to_string(&staged.to_document())?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl FactStore for JsonFileStore {
    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn max_fact_date(&self) -> Option<NaiveDate> {
        self.inner.max_fact_date()
    }

    fn attributes(&self) -> &AttributeSchema {
        self.inner.attributes()
    }

    fn watermark(&self) -> Option<&Watermark> {
        self.inner.watermark()
    }

    fn scan(&self) -> Vec<FactRow> {
        self.inner.scan()
    }

    fn apply(&mut self, batch: BatchWrite) -> Result<UpsertStats> {
        let (staged, stats) = self.inner.merged(batch)?;
        self.persist(&staged)?;
        self.inner = staged;
        Ok(stats)
    }
}
