//! Pipeline plans produced by the external query translator.

use std::collections::HashSet;

use datasources::ParamBindings;
use once_cell::sync::Lazy;
use regex::Regex;
use schemastore::BackendKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ExecError, Result};
use crate::fingerprint::{self, Fingerprint};
use crate::placeholder::scan_placeholders;

/// One backend-targeted step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Ordinal position; defines execution order.
    #[serde(default)]
    pub index: usize,
    pub backend: BackendKind,
    /// Query template, possibly containing `{{stage.field}}` placeholders.
    /// For the document backend this is a JSON query document as text.
    pub query: String,
    #[serde(default)]
    pub params: ParamBindings,
    /// When set, this stage's rows appear in the final merged output under
    /// this label.
    #[serde(default)]
    pub output_label: Option<String>,
    /// Free-text stage description from the translator. Logged only.
    #[serde(default)]
    pub description: Option<String>,
}

/// An ordered sequence of stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub stages: Vec<Stage>,
}

/// Translator placeholders of the form `{previous_stageN.field}` (single or
/// double braced, 1-based stage numbers) normalize to `{{N-1.field}}`.
static PREVIOUS_STAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{?\s*previous_stage(\d+)\.([A-Za-z_][A-Za-z0-9_.]*)(\s*\|\s*[a-z-]+)?\s*\}?\}")
        .unwrap()
});

impl Plan {
    pub fn new(stages: Vec<Stage>) -> Plan {
        Plan { stages }
    }

    /// Parse a plan from translator JSON.
    ///
    /// Accepts both the engine-native shape (`{"stages": [...]}` with
    /// 0-based ordinals) and the translator wire shape
    /// (`{"pipeline": [{"stage": 1, "database": ..., "query": {...}}]}`
    /// with 1-based stage numbers and `previous_stageN` placeholders).
    pub fn from_value(value: &Value) -> Result<Plan> {
        let mut plan = if value.get("stages").is_some() {
            serde_json::from_value::<Plan>(value.clone())
                .map_err(|e| ExecError::InvalidPlan(e.to_string()))?
        } else if let Some(pipeline) = value.get("pipeline") {
            Self::from_wire_pipeline(pipeline)?
        } else {
            return Err(ExecError::InvalidPlan(
                "expected a 'stages' or 'pipeline' key".to_string(),
            ));
        };

        for (idx, stage) in plan.stages.iter_mut().enumerate() {
            stage.index = idx;
            stage.query = normalize_placeholders(&stage.query);
            for value in stage.params.values_mut() {
                if let Value::String(s) = value {
                    *value = Value::String(normalize_placeholders(s));
                }
            }
        }
        Ok(plan)
    }

    fn from_wire_pipeline(pipeline: &Value) -> Result<Plan> {
        let entries = pipeline
            .as_array()
            .ok_or_else(|| ExecError::InvalidPlan("'pipeline' is not an array".to_string()))?;

        let mut stages = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            let backend = entry
                .get("database")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ExecError::InvalidPlan(format!("pipeline entry {idx} is missing 'database'"))
                })?
                .parse::<BackendKind>()
                .map_err(|e| ExecError::InvalidPlan(e.to_string()))?;

            // The wire shape keys the query by database name; the document
            // backend's query may itself be a JSON document.
            let query = entry
                .get("query")
                .and_then(|q| {
                    q.as_str()
                        .map(str::to_string)
                        .or_else(|| q.get(backend.as_str()).map(query_text))
                        .or_else(|| {
                            // The translator spells the key the way it spells
                            // the database ("postgresql"), not canonically.
                            q.as_object().and_then(|obj| {
                                obj.iter()
                                    .find(|(k, _)| {
                                        k.parse::<BackendKind>().map(|p| p == backend).unwrap_or(false)
                                    })
                                    .map(|(_, v)| query_text(v))
                            })
                        })
                })
                .ok_or_else(|| {
                    ExecError::InvalidPlan(format!("pipeline entry {idx} has no query for its database"))
                })?;

            let params = match entry.get("params") {
                Some(params) => serde_json::from_value(params.clone())
                    .map_err(|e| ExecError::InvalidPlan(format!("pipeline entry {idx}: {e}")))?,
                None => ParamBindings::new(),
            };

            stages.push(Stage {
                index: idx,
                backend,
                query,
                params,
                output_label: entry
                    .get("output_label")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                description: entry
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        Ok(Plan { stages })
    }

    /// Structural validation, run before any stage executes.
    ///
    /// Every placeholder must reference an earlier stage; backward, self and
    /// forward references are all plan defects. Output labels must be unique.
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(ExecError::InvalidPlan("plan has no stages".to_string()));
        }

        let mut labels = HashSet::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            if stage.index != idx {
                return Err(ExecError::InvalidPlan(format!(
                    "stage ordinals must be contiguous; found {} at position {idx}",
                    stage.index
                )));
            }

            let mut refs = scan_placeholders(&stage.query)
                .map_err(|e| ExecError::InvalidPlan(format!("stage {idx}: {e}")))?;
            for value in stage.params.values() {
                if let Value::String(s) = value {
                    refs.extend(
                        scan_placeholders(s)
                            .map_err(|e| ExecError::InvalidPlan(format!("stage {idx}: {e}")))?,
                    );
                }
            }
            for r in refs {
                if r.stage >= idx {
                    return Err(ExecError::InvalidPlan(format!(
                        "stage {idx} references stage {} which has not executed yet",
                        r.stage
                    )));
                }
            }

            if let Some(label) = &stage.output_label {
                if !labels.insert(label.clone()) {
                    return Err(ExecError::InvalidPlan(format!(
                        "duplicate output label '{label}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint::fingerprint(self)
    }
}

fn query_text(query: &Value) -> String {
    match query {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn normalize_placeholders(template: &str) -> String {
    PREVIOUS_STAGE_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let number: usize = caps[1].parse().unwrap_or(0);
            let policy = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            // Wire stage numbers are 1-based.
            format!("{{{{{}.{}{}}}}}", number.saturating_sub(1), &caps[2], policy)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_native_shape() {
        let value = json!({
            "stages": [
                { "backend": "postgres", "query": "SELECT id FROM movies", "output_label": "movies" },
                { "backend": "neo4j", "query": "MATCH (m) WHERE m.id IN [{{0.id|list}}] RETURN m" },
            ],
        });
        let plan = Plan::from_value(&value).unwrap();
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[1].index, 1);
        assert_eq!(plan.stages[0].output_label.as_deref(), Some("movies"));
        plan.validate().unwrap();
    }

    #[test]
    fn parses_translator_wire_shape() {
        let value = json!({
            "pipeline": [
                {
                    "stage": 1,
                    "database": "neo4j",
                    "query": { "neo4j": "MATCH (p:Person {name: 'Christopher Nolan'})-[:DIRECTED]->(m:Movie) RETURN m.id as id" },
                    "description": "Movies directed by Nolan",
                },
                {
                    "stage": 2,
                    "database": "postgresql",
                    "query": { "postgresql": "SELECT title FROM movies WHERE id IN ({previous_stage1.id|list})" },
                    "output_label": "movies",
                },
            ],
        });
        let plan = Plan::from_value(&value).unwrap();
        assert_eq!(plan.stages[0].backend, BackendKind::Neo4j);
        assert_eq!(plan.stages[1].backend, BackendKind::Postgres);
        // 1-based wire reference became a 0-based ordinal reference.
        assert!(plan.stages[1].query.contains("{{0.id|list}}"));
        plan.validate().unwrap();
    }

    #[test]
    fn wire_mongo_query_document_becomes_text() {
        let value = json!({
            "pipeline": [
                {
                    "stage": 1,
                    "database": "mongodb",
                    "query": { "mongodb": { "collection": "reviews", "filter": {} } },
                },
            ],
        });
        let plan = Plan::from_value(&value).unwrap();
        let parsed: Value = serde_json::from_str(&plan.stages[0].query).unwrap();
        assert_eq!(parsed["collection"], json!("reviews"));
    }

    #[test]
    fn validate_rejects_forward_and_self_references() {
        let value = json!({
            "stages": [
                { "backend": "postgres", "query": "SELECT * FROM movies WHERE id = {{0.id}}" },
            ],
        });
        let plan = Plan::from_value(&value).unwrap();
        assert!(matches!(plan.validate(), Err(ExecError::InvalidPlan(_))));

        let value = json!({
            "stages": [
                { "backend": "postgres", "query": "SELECT * FROM movies WHERE id = {{1.id}}" },
                { "backend": "postgres", "query": "SELECT 1" },
            ],
        });
        let plan = Plan::from_value(&value).unwrap();
        assert!(matches!(plan.validate(), Err(ExecError::InvalidPlan(_))));
    }

    #[test]
    fn validate_rejects_empty_plan_and_duplicate_labels() {
        assert!(Plan::new(Vec::new()).validate().is_err());

        let value = json!({
            "stages": [
                { "backend": "postgres", "query": "SELECT 1", "output_label": "out" },
                { "backend": "postgres", "query": "SELECT 2", "output_label": "out" },
            ],
        });
        let plan = Plan::from_value(&value).unwrap();
        assert!(matches!(plan.validate(), Err(ExecError::InvalidPlan(_))));
    }

    #[test]
    fn validate_scans_params_for_references() {
        let value = json!({
            "stages": [
                { "backend": "postgres", "query": "SELECT 1", "params": { "id": "{{2.id}}" } },
                { "backend": "postgres", "query": "SELECT 2" },
            ],
        });
        let plan = Plan::from_value(&value).unwrap();
        assert!(matches!(plan.validate(), Err(ExecError::InvalidPlan(_))));
    }
}
