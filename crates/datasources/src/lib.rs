//! Backend adapters for pipeline stages.
//!
//! One adapter per backend kind, each implementing the same execute/translate
//! contract. Adapters never retry internally; retry policy belongs to the
//! executor driving them.
pub mod errors;

pub mod debug;
pub mod mongodb;
pub mod neo4j;
pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use schemastore::{BackendKind, SemType};
use serde_json::Value;

use errors::Result;

/// Named parameters passed alongside a query. Insertion-ordered.
pub type ParamBindings = IndexMap<String, Value>;

/// Rows produced by one stage execution, one JSON object per row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub backend: BackendKind,
    pub rows: Vec<Value>,
}

impl ResultSet {
    pub fn new(backend: BackendKind, rows: Vec<Value>) -> ResultSet {
        ResultSet { backend, rows }
    }

    pub fn empty(backend: BackendKind) -> ResultSet {
        ResultSet {
            backend,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A resolved placeholder value, after coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ScalarValue>),
}

impl ScalarValue {
    pub fn from_json(value: &Value) -> ScalarValue {
        match value {
            Value::Null => ScalarValue::Null,
            Value::Bool(b) => ScalarValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(v) => ScalarValue::Int(v),
                None => ScalarValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ScalarValue::Text(s.clone()),
            Value::Array(items) => {
                ScalarValue::List(items.iter().map(ScalarValue::from_json).collect())
            }
            // Composite values substitute as their JSON text.
            Value::Object(_) => ScalarValue::Text(value.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ScalarValue::Null => Value::Null,
            ScalarValue::Bool(b) => Value::Bool(*b),
            ScalarValue::Int(v) => Value::from(*v),
            ScalarValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ScalarValue::Text(s) => Value::String(s.clone()),
            ScalarValue::List(items) => {
                Value::Array(items.iter().map(ScalarValue::to_json).collect())
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarValue::Null => "null",
            ScalarValue::Bool(_) => "boolean",
            ScalarValue::Int(_) => "integer",
            ScalarValue::Float(_) => "float",
            ScalarValue::Text(_) => "text",
            ScalarValue::List(_) => "list",
        }
    }
}

/// How a translated value reaches the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Translated {
    /// A fragment spliced into the query text, already escaped/encoded for
    /// the target backend.
    Literal(String),
    /// A typed value bound as a named driver parameter. The resolver picks
    /// the name and records the binding.
    Bound(Value),
}

/// The uniform per-backend contract.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Execute a query against the backend. Never retries internally.
    async fn execute(&self, query: &str, params: &ParamBindings) -> Result<ResultSet>;

    /// Render a resolved placeholder value for this backend.
    ///
    /// Values always pass through here rather than being interpolated raw, so
    /// each backend controls its own escaping or parameterization.
    fn translate_value(&self, value: &ScalarValue, target: SemType) -> Result<Translated>;

    /// Connectivity check.
    async fn ping(&self) -> Result<()>;

    /// Release the underlying connection/session.
    async fn close(&self) -> Result<()>;
}

/// The adapters available to an engine, keyed by backend kind.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<BackendKind, Arc<dyn BackendAdapter>>,
}

impl AdapterSet {
    pub fn new() -> AdapterSet {
        AdapterSet {
            adapters: HashMap::new(),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn BackendAdapter>) -> AdapterSet {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: Arc<dyn BackendAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub async fn close_all(&self) -> Result<()> {
        for adapter in self.adapters.values() {
            adapter.close().await?;
        }
        Ok(())
    }
}
