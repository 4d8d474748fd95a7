//! Durable record of what each node looked like after its last successful
//! apply.
//!
//! The document is loaded once at the start of a pass and rewritten once at
//! the end. File commits go through a temp file in the same directory and an
//! atomic rename, so an interrupted pass leaves the previous commit intact.

use crate::error::StateError;
use crate::types::{NodeId, Properties};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Newest state document layout this build understands
pub const STATE_VERSION: u32 = 1;

// ============================================================================
// State Structures
// ============================================================================

/// Snapshot of one node after its last successful apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Inputs as resolved at apply time
    #[serde(default)]
    pub inputs: Properties,

    /// Outputs returned by the provider
    #[serde(default)]
    pub outputs: Properties,

    pub provider_id: String,

    /// Nodes this one depended on, used to order its deletion
    #[serde(default)]
    pub dependencies: Vec<NodeId>,

    /// Input properties holding secret values
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub secrets: BTreeSet<String>,
}

impl StateRecord {
    /// Recorded output, falling back to the provider id for `id`
    pub fn output(&self, name: &str) -> Option<Value> {
        self.outputs
            .get(name)
            .cloned()
            .or_else(|| (name == "id").then(|| Value::String(self.provider_id.clone())))
    }
}

/// Old instance of a replaced node whose destroy has not succeeded yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub node: NodeId,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub provider_id: String,
    #[serde(default)]
    pub dependencies: Vec<NodeId>,
}

/// The persisted state document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,

    /// Incremented on every commit
    #[serde(default)]
    pub serial: u64,

    pub last_updated: DateTime<Utc>,

    #[serde(default)]
    pub resources: IndexMap<NodeId, StateRecord>,

    /// Resolved stack exports
    #[serde(default)]
    pub exports: IndexMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub secret_exports: BTreeSet<String>,

    #[serde(default)]
    pub pending_deletes: Vec<PendingDelete>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            last_updated: Utc::now(),
            resources: IndexMap::new(),
            exports: IndexMap::new(),
            secret_exports: BTreeSet::new(),
            pending_deletes: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

impl StateDocument {
    pub fn record(&self, id: &str) -> Option<&StateRecord> {
        self.resources.get(id)
    }

    /// Bump the serial and timestamp before a commit
    pub fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }

    /// Parse a document, rejecting unknown future versions
    pub fn from_json(path: &Path, content: &str) -> Result<Self, StateError> {
        let corrupt = |message: String| StateError::Corruption {
            path: path.to_path_buf(),
            message,
        };

        let probe: VersionProbe =
            serde_json::from_str(content).map_err(|e| corrupt(e.to_string()))?;
        let found = probe
            .version
            .ok_or_else(|| corrupt("missing version field".to_string()))?;
        if found > STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                path: path.to_path_buf(),
                found,
                supported: STATE_VERSION,
            });
        }

        serde_json::from_str(content).map_err(|e| corrupt(e.to_string()))
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Durable home of the state document
pub trait StateStore: Send + Sync {
    /// Load the last committed document, or an empty one if none exists
    fn load(&self) -> Result<StateDocument, StateError>;

    /// Atomically replace the committed document
    fn commit(&self, document: &StateDocument) -> Result<(), StateError>;
}

/// JSON file on disk
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: io::Error) -> StateError {
        StateError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<StateDocument, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    "State file {} does not exist, using empty state",
                    self.path.display()
                );
                return Ok(StateDocument::default());
            }
            Err(e) => {
                return Err(StateError::Corruption {
                    path: self.path.clone(),
                    message: format!("unreadable: {e}"),
                });
            }
        };

        let document = StateDocument::from_json(&self.path, &content)?;
        log::debug!(
            "Loaded state serial {} ({} resources) from {}",
            document.serial,
            document.resources.len(),
            self.path.display()
        );
        Ok(document)
    }

    fn commit(&self, document: &StateDocument) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| self.write_error(e))?;

        let mut content = serde_json::to_string_pretty(document)?;
        content.push('\n');

        let mut temp = NamedTempFile::new_in(dir).map_err(|e| self.write_error(e))?;
        temp.write_all(content.as_bytes())
            .map_err(|e| self.write_error(e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| self.write_error(e))?;
        temp.persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;

        log::debug!(
            "Committed state serial {} to {}",
            document.serial,
            self.path.display()
        );
        Ok(())
    }
}

/// In-memory store; keeps the serialized form so round trips are exercised
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    committed: Mutex<Option<String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with raw JSON
    pub fn from_json(content: impl Into<String>) -> Self {
        Self {
            committed: Mutex::new(Some(content.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        match self.committed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<StateDocument, StateError> {
        match self.slot().as_deref() {
            Some(content) => StateDocument::from_json(Path::new("<memory>"), content),
            None => Ok(StateDocument::default()),
        }
    }

    fn commit(&self, document: &StateDocument) -> Result<(), StateError> {
        let content = serde_json::to_string(document)?;
        *self.slot() = Some(content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_document() -> StateDocument {
        let mut document = StateDocument::default();
        let mut outputs = Properties::new();
        outputs.insert("id".to_string(), json!("vpc-123"));
        document.resources.insert(
            NodeId::from("vpc"),
            StateRecord {
                resource_type: "aws:ec2/Vpc".to_string(),
                inputs: Properties::new(),
                outputs,
                provider_id: "vpc-123".to_string(),
                dependencies: Vec::new(),
                secrets: BTreeSet::new(),
            },
        );
        document
            .exports
            .insert("vpcId".to_string(), json!("vpc-123"));
        document
    }

    #[test]
    fn test_missing_file_loads_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        let document = store.load().unwrap();
        assert_eq!(document.serial, 0);
        assert!(document.resources.is_empty());
    }

    #[test]
    fn test_commit_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("nested").join("state.json"));

        let mut document = sample_document();
        document.touch();
        store.commit(&document).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, document);
        assert_eq!(loaded.serial, 1);
    }

    #[test]
    fn test_commit_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        store.commit(&sample_document()).unwrap();
        store.commit(&sample_document()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let err = FileStateStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::Corruption { .. }));
        // never repaired
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_future_version_rejected() {
        let store = MemoryStateStore::from_json(
            r#"{"version": 99, "last_updated": "2024-01-01T00:00:00Z"}"#,
        );
        assert!(matches!(
            store.load(),
            Err(StateError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_missing_version_is_corruption() {
        let store = MemoryStateStore::from_json(r#"{"resources": {}}"#);
        assert!(matches!(store.load(), Err(StateError::Corruption { .. })));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let store = MemoryStateStore::from_json(
            r#"{"version": 1, "last_updated": "2024-01-01T00:00:00Z", "checksum": "abc"}"#,
        );
        let document = store.load().unwrap();
        assert!(document.pending_deletes.is_empty());
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStateStore::new();
        assert!(store.load().unwrap().resources.is_empty());

        store.commit(&sample_document()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.resources.len(), 1);
    }

    #[test]
    fn test_record_output_falls_back_to_provider_id() {
        let mut record = sample_document().resources["vpc"].clone();
        record.outputs.clear();
        assert_eq!(record.output("id"), Some(json!("vpc-123")));
        assert_eq!(record.output("arn"), None);
    }
}
