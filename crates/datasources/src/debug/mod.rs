//! A scriptable adapter for exercising the executor without live backends.
//!
//! Responses are keyed by exact query text; failures can be injected with a
//! class and a count so retry behavior is observable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use schemastore::{BackendKind, SemType};
use serde_json::Value;

use crate::errors::{BackendError, ErrorClass, Result};
use crate::postgres::sql_literal;
use crate::{BackendAdapter, ParamBindings, ResultSet, ScalarValue, Translated};

#[derive(Default)]
struct FailureScript {
    class: Option<ErrorClass>,
    remaining: usize,
}

pub struct DebugAdapter {
    kind: BackendKind,
    responses: Mutex<HashMap<String, Vec<Value>>>,
    failure: Mutex<FailureScript>,
    calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl DebugAdapter {
    /// A debug adapter standing in for the given backend kind.
    pub fn new(kind: BackendKind) -> DebugAdapter {
        DebugAdapter {
            kind,
            responses: Mutex::new(HashMap::new()),
            failure: Mutex::new(FailureScript::default()),
            calls: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(self, query: impl Into<String>, rows: Vec<Value>) -> DebugAdapter {
        self.script_response(query, rows);
        self
    }

    /// Canned rows returned for an exact query text. Unscripted queries
    /// return zero rows.
    pub fn script_response(&self, query: impl Into<String>, rows: Vec<Value>) {
        self.responses.lock().insert(query.into(), rows);
    }

    /// Fail the next `times` calls with the given class.
    pub fn fail_next(&self, class: ErrorClass, times: usize) {
        let mut failure = self.failure.lock();
        failure.class = Some(class);
        failure.remaining = times;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Query texts seen by `execute`, in call order.
    pub fn executed_queries(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl BackendAdapter for DebugAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn execute(&self, query: &str, _params: &ParamBindings) -> Result<ResultSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().push(query.to_string());

        {
            let mut failure = self.failure.lock();
            if failure.remaining > 0 {
                failure.remaining -= 1;
                if let Some(class) = failure.class {
                    return Err(BackendError::new(self.kind, class, "injected failure"));
                }
            }
        }

        let rows = self
            .responses
            .lock()
            .get(query)
            .cloned()
            .unwrap_or_default();
        Ok(ResultSet::new(self.kind, rows))
    }

    fn translate_value(&self, value: &ScalarValue, target: SemType) -> Result<Translated> {
        Ok(Translated::Literal(sql_literal(value, target)))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
