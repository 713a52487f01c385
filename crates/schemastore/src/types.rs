use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, SchemaError};

/// The kinds of backends a pipeline stage can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The relational store.
    #[serde(alias = "postgresql")]
    Postgres,
    /// The graph store.
    Neo4j,
    /// The document store.
    #[serde(alias = "mongo")]
    MongoDb,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Postgres,
        BackendKind::Neo4j,
        BackendKind::MongoDb,
    ];

    /// The canonical name, matching both the plan wire format and the schema
    /// document's top-level keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Neo4j => "neo4j",
            BackendKind::MongoDb => "mongodb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => BackendKind::Postgres,
            "neo4j" => BackendKind::Neo4j,
            "mongodb" | "mongo" => BackendKind::MongoDb,
            other => return Err(SchemaError::UnknownBackend(other.to_string())),
        })
    }
}

/// Semantic scalar type shared across backends.
///
/// Each backend's declared type strings normalize into this enum so the
/// resolver can coerce values moving between backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
    Unknown,
}

impl SemType {
    /// Normalize a backend-declared type string.
    ///
    /// Covers Postgres `information_schema` names as well as the uppercase
    /// names document inference emits (`"STRING"`, `"INTEGER"`, ...).
    pub fn from_declared(declared: &str) -> SemType {
        let d = declared.trim().to_ascii_lowercase();
        let d = d.as_str();
        if d.contains("char") || d == "text" || d == "string" || d == "name" {
            SemType::Text
        } else if d.contains("serial") || d.contains("int") {
            SemType::Integer
        } else if d.contains("numeric")
            || d.contains("decimal")
            || d.contains("double")
            || d.contains("real")
            || d.contains("float")
        {
            SemType::Float
        } else if d.contains("bool") {
            SemType::Boolean
        } else if d.contains("timestamp") || d == "date" || d == "datetime" {
            SemType::Timestamp
        } else if d.contains("json") {
            SemType::Json
        } else {
            SemType::Unknown
        }
    }
}

/// A set of node labels.
///
/// Graph schema inference stringifies label tuples (`"('Person',)"`), so
/// parsing accepts that form as well as a plain label name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelSet(pub Vec<String>);

impl LabelSet {
    pub fn parse(raw: &str) -> LabelSet {
        let trimmed = raw.trim().trim_start_matches('(').trim_end_matches(')');
        let labels = trimmed
            .split(',')
            .map(|part| part.trim().trim_matches('\'').trim_matches('"').to_string())
            .filter(|part| !part.is_empty())
            .collect();
        LabelSet(labels)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.iter().any(|l| l == label)
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(":"))
    }
}

/// A relational column with its declared and normalized type.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub declared: String,
    pub sem: SemType,
}

/// A document field with its declared and normalized type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub declared: String,
    pub sem: SemType,
}

/// Structural description of one backend, immutable once built.
///
/// Only the namespaces relevant to the backend kind are populated: `tables`
/// for relational, `nodes`/`relationships` for graph, `collections` for
/// document.
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    backend: BackendKind,
    tables: IndexMap<String, Vec<ColumnDef>>,
    nodes: IndexMap<LabelSet, Vec<String>>,
    relationships: IndexMap<String, Vec<String>>,
    collections: IndexMap<String, IndexMap<String, FieldDef>>,
}

impl SchemaSnapshot {
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn tables(&self) -> &IndexMap<String, Vec<ColumnDef>> {
        &self.tables
    }

    pub fn nodes(&self) -> &IndexMap<LabelSet, Vec<String>> {
        &self.nodes
    }

    pub fn relationships(&self) -> &IndexMap<String, Vec<String>> {
        &self.relationships
    }

    pub fn collections(&self) -> &IndexMap<String, IndexMap<String, FieldDef>> {
        &self.collections
    }

    fn empty(backend: BackendKind) -> SchemaSnapshot {
        SchemaSnapshot {
            backend,
            tables: IndexMap::new(),
            nodes: IndexMap::new(),
            relationships: IndexMap::new(),
            collections: IndexMap::new(),
        }
    }

    /// Build a snapshot from one backend's section of the inference document.
    pub fn from_value(backend: BackendKind, value: &Value) -> Result<SchemaSnapshot> {
        match backend {
            BackendKind::Postgres => Self::relational_from_value(value),
            BackendKind::Neo4j => Self::graph_from_value(value),
            BackendKind::MongoDb => Self::document_from_value(value),
        }
    }

    fn relational_from_value(value: &Value) -> Result<SchemaSnapshot> {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed(BackendKind::Postgres, "expected object of tables"))?;

        let mut snapshot = SchemaSnapshot::empty(BackendKind::Postgres);
        for (table, columns) in obj {
            let columns = columns.as_array().ok_or_else(|| {
                malformed(
                    BackendKind::Postgres,
                    format!("table '{table}' is not a column list"),
                )
            })?;

            let mut defs = Vec::with_capacity(columns.len());
            for column in columns {
                // Inference emits each column as a [name, declared_type] pair.
                let pair = column.as_array().filter(|p| p.len() >= 2).ok_or_else(|| {
                    malformed(
                        BackendKind::Postgres,
                        format!("column entry in table '{table}' is not a [name, type] pair"),
                    )
                })?;
                let (name, declared) = match (pair[0].as_str(), pair[1].as_str()) {
                    (Some(name), Some(declared)) => (name, declared),
                    _ => {
                        return Err(malformed(
                            BackendKind::Postgres,
                            format!("non-string column entry in table '{table}'"),
                        ))
                    }
                };
                defs.push(ColumnDef {
                    name: name.to_string(),
                    declared: declared.to_string(),
                    sem: SemType::from_declared(declared),
                });
            }
            snapshot.tables.insert(table.clone(), defs);
        }
        Ok(snapshot)
    }

    fn graph_from_value(value: &Value) -> Result<SchemaSnapshot> {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed(BackendKind::Neo4j, "expected object"))?;

        let mut snapshot = SchemaSnapshot::empty(BackendKind::Neo4j);
        if let Some(nodes) = obj.get("nodes") {
            let nodes = nodes
                .as_object()
                .ok_or_else(|| malformed(BackendKind::Neo4j, "'nodes' is not an object"))?;
            for (labels, properties) in nodes {
                snapshot.insert_graph_entry(labels, properties, true)?;
            }
        }
        if let Some(relationships) = obj.get("relationships") {
            let relationships = relationships.as_object().ok_or_else(|| {
                malformed(BackendKind::Neo4j, "'relationships' is not an object")
            })?;
            for (rel_type, properties) in relationships {
                snapshot.insert_graph_entry(rel_type, properties, false)?;
            }
        }
        Ok(snapshot)
    }

    fn insert_graph_entry(&mut self, key: &str, properties: &Value, is_node: bool) -> Result<()> {
        let properties = properties
            .as_array()
            .ok_or_else(|| {
                malformed(
                    BackendKind::Neo4j,
                    format!("properties of '{key}' are not a list"),
                )
            })?
            .iter()
            .filter_map(|p| p.as_str().map(str::to_string))
            .collect();

        if is_node {
            self.nodes.insert(LabelSet::parse(key), properties);
        } else {
            self.relationships.insert(key.to_string(), properties);
        }
        Ok(())
    }

    fn document_from_value(value: &Value) -> Result<SchemaSnapshot> {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed(BackendKind::MongoDb, "expected object of collections"))?;

        let mut snapshot = SchemaSnapshot::empty(BackendKind::MongoDb);
        for (collection, fields) in obj {
            let fields_obj = fields.as_object().ok_or_else(|| {
                malformed(
                    BackendKind::MongoDb,
                    format!("collection '{collection}' is not a field map"),
                )
            })?;
            let mut defs = IndexMap::new();
            flatten_fields(fields_obj, "", &mut defs);
            snapshot.collections.insert(collection.clone(), defs);
        }
        Ok(snapshot)
    }

    /// Look up the normalized type for a field name or dotted path.
    ///
    /// The search covers the namespace appropriate to the backend. When a
    /// name occurs more than once (e.g. two tables with an `id` column), the
    /// first occurrence wins.
    pub fn field_type(&self, path: &str) -> Option<SemType> {
        let name = path.rsplit('.').next().unwrap_or(path);
        match self.backend {
            BackendKind::Postgres => self
                .tables
                .values()
                .flat_map(|columns| columns.iter())
                .find(|c| c.name == name)
                .map(|c| c.sem),
            BackendKind::Neo4j => {
                // Graph inference records property names only; the type is
                // unknown and coercion passes values through unchanged.
                let found = self
                    .nodes
                    .values()
                    .any(|props| props.iter().any(|p| p == name))
                    || self
                        .relationships
                        .values()
                        .any(|props| props.iter().any(|p| p == name));
                found.then_some(SemType::Unknown)
            }
            BackendKind::MongoDb => {
                for fields in self.collections.values() {
                    if let Some(def) = fields.get(path) {
                        return Some(def.sem);
                    }
                }
                self.collections
                    .values()
                    .flat_map(|fields| fields.iter())
                    .find(|(key, _)| key.as_str() == name || key.rsplit('.').next() == Some(name))
                    .map(|(_, def)| def.sem)
            }
        }
    }
}

/// Flatten nested document field maps into dotted paths.
fn flatten_fields(
    fields: &serde_json::Map<String, Value>,
    prefix: &str,
    out: &mut IndexMap<String, FieldDef>,
) {
    for (name, value) in fields {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match value {
            Value::Object(nested) => flatten_fields(nested, &path, out),
            Value::String(declared) => {
                out.insert(
                    path,
                    FieldDef {
                        declared: declared.clone(),
                        sem: SemType::from_declared(declared),
                    },
                );
            }
            other => {
                out.insert(
                    path,
                    FieldDef {
                        declared: other.to_string(),
                        sem: SemType::Unknown,
                    },
                );
            }
        }
    }
}

fn malformed(kind: BackendKind, reason: impl Into<String>) -> SchemaError {
    SchemaError::Malformed {
        kind,
        reason: reason.into(),
    }
}
