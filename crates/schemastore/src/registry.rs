use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SchemaError};
use crate::types::{BackendKind, SchemaSnapshot};

/// Produces the combined schema document emitted by schema inference.
pub trait SchemaSource: Send + Sync {
    fn fetch(&self) -> Result<Value>;
}

/// Reads the inference output from disk (`schemas.json`).
pub struct FileSchemaSource {
    path: PathBuf,
}

impl FileSchemaSource {
    pub fn new(path: impl Into<PathBuf>) -> FileSchemaSource {
        FileSchemaSource { path: path.into() }
    }
}

impl SchemaSource for FileSchemaSource {
    fn fetch(&self) -> Result<Value> {
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// An in-memory schema document, for tests and embedding.
pub struct StaticSchemaSource {
    value: Value,
}

impl StaticSchemaSource {
    pub fn new(value: Value) -> StaticSchemaSource {
        StaticSchemaSource { value }
    }
}

impl SchemaSource for StaticSchemaSource {
    fn fetch(&self) -> Result<Value> {
        Ok(self.value.clone())
    }
}

/// Read-shared registry of per-backend schema snapshots.
///
/// Reload replaces a backend's snapshot atomically; readers holding a
/// previous `Arc` keep a consistent view and never observe a partial update.
pub struct SchemaRegistry {
    source: Box<dyn SchemaSource>,
    snapshots: RwLock<HashMap<BackendKind, Arc<SchemaSnapshot>>>,
}

impl SchemaRegistry {
    pub fn new(source: Box<dyn SchemaSource>) -> SchemaRegistry {
        SchemaRegistry {
            source,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Load (or reload) the snapshot for a single backend.
    pub fn load(&self, kind: BackendKind) -> Result<()> {
        let doc = self.source.fetch()?;
        let section = doc
            .get(kind.as_str())
            .ok_or(SchemaError::SchemaUnavailable(kind))?;
        let snapshot = SchemaSnapshot::from_value(kind, section)?;
        debug!(%kind, "loaded schema snapshot");
        self.snapshots.write().insert(kind, Arc::new(snapshot));
        Ok(())
    }

    /// Load every backend section present in the source document.
    ///
    /// Unknown top-level keys are skipped. Returns the kinds loaded.
    pub fn load_all(&self) -> Result<Vec<BackendKind>> {
        let doc = self.source.fetch()?;
        let obj = doc
            .as_object()
            .ok_or_else(|| SchemaError::MalformedDocument("expected top-level object".into()))?;

        let mut loaded = Vec::new();
        for (key, section) in obj {
            let Ok(kind) = key.parse::<BackendKind>() else {
                continue;
            };
            let snapshot = SchemaSnapshot::from_value(kind, section)?;
            self.snapshots.write().insert(kind, Arc::new(snapshot));
            loaded.push(kind);
        }
        debug!(?loaded, "loaded schema snapshots");
        Ok(loaded)
    }

    /// Get the current snapshot for a backend. Concurrent-read safe.
    pub fn get(&self, kind: BackendKind) -> Result<Arc<SchemaSnapshot>> {
        self.snapshots
            .read()
            .get(&kind)
            .cloned()
            .ok_or(SchemaError::NotLoaded(kind))
    }
}
