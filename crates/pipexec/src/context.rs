//! Per-execution accumulation of stage outputs.

use datasources::ResultSet;
use indexmap::IndexMap;

/// Maps completed stage ordinals to their results.
///
/// Owned by exactly one pipeline execution and dropped when it finishes;
/// never shared across concurrent executions.
#[derive(Debug, Default)]
pub struct Context {
    results: IndexMap<usize, ResultSet>,
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    pub fn insert(&mut self, stage: usize, result: ResultSet) {
        self.results.insert(stage, result);
    }

    pub fn get(&self, stage: usize) -> Option<&ResultSet> {
        self.results.get(&stage)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
