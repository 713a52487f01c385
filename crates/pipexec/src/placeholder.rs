//! Placeholder scanning and resolution.
//!
//! Stage templates reference earlier stage outputs with
//! `{{stage.field}}` tokens, optionally carrying an aggregation policy
//! (`{{0.id|list}}`). Resolution extracts the referenced values, coerces
//! them to the target field's semantic type, and hands them to the stage's
//! adapter for backend-appropriate rendering.

use std::str::FromStr;

use datasources::{BackendAdapter, ParamBindings, ScalarValue, Translated};
use once_cell::sync::Lazy;
use regex::Regex;
use schemastore::{SchemaRegistry, SemType};
use serde_json::Value;

use crate::context::Context;
use crate::errors::{ExecError, Result};
use crate::plan::Stage;
use crate::Warning;

/// How multiple extracted values collapse into one substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggPolicy {
    First,
    List,
    DistinctList,
}

impl FromStr for AggPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<AggPolicy, String> {
        match s {
            "first" => Ok(AggPolicy::First),
            "list" => Ok(AggPolicy::List),
            "distinct-list" => Ok(AggPolicy::DistinctList),
            other => Err(format!("unknown aggregation policy '{other}'")),
        }
    }
}

/// One placeholder occurrence in a template, with its byte span.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderRef {
    pub stage: usize,
    pub path: String,
    pub policy: Option<AggPolicy>,
    pub token: String,
    pub start: usize,
    pub end: usize,
}

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*(\d+)\s*\.\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(?:\|\s*([a-z-]+)\s*)?\}\}")
        .unwrap()
});

/// Find every placeholder in a template, left to right.
///
/// Any `{{` that does not open a well-formed placeholder is an error; a
/// half-written token silently reaching a backend would be worse.
pub fn scan_placeholders(template: &str) -> Result<Vec<PlaceholderRef>, String> {
    let mut refs = Vec::new();
    let mut at = 0;
    while let Some(open) = template[at..].find("{{") {
        let open = at + open;
        let caps = PLACEHOLDER_RE
            .captures_at(template, open)
            .filter(|c| c.get(0).map(|m| m.start()) == Some(open))
            .ok_or_else(|| {
                let tail: String = template[open..].chars().take(24).collect();
                format!("malformed placeholder at '{tail}'")
            })?;
        let whole = caps.get(0).ok_or_else(|| "malformed placeholder".to_string())?;
        let stage = caps[1]
            .parse::<usize>()
            .map_err(|_| format!("placeholder stage out of range in '{}'", whole.as_str()))?;
        let policy = match caps.get(3) {
            Some(m) => Some(m.as_str().parse::<AggPolicy>()?),
            None => None,
        };
        refs.push(PlaceholderRef {
            stage,
            path: caps[2].to_string(),
            policy,
            token: whole.as_str().to_string(),
            start: whole.start(),
            end: whole.end(),
        });
        at = whole.end();
    }
    Ok(refs)
}

/// A stage template after resolution, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub text: String,
    pub params: ParamBindings,
    pub warnings: Vec<Warning>,
    /// A list-policy placeholder resolved over zero rows. Executing the
    /// query would match nothing; the stage yields an empty result without
    /// touching the backend.
    pub short_circuit: bool,
}

/// Resolve every placeholder in a stage's query and params.
pub fn resolve_stage(
    stage: &Stage,
    context: &Context,
    registry: &SchemaRegistry,
    adapter: &dyn BackendAdapter,
) -> Result<ResolvedQuery> {
    let mut resolver = Resolver {
        stage,
        context,
        registry,
        adapter,
        warnings: Vec::new(),
        bound: ParamBindings::new(),
        next_param: 0,
        short_circuit: false,
    };

    let text = resolver.resolve_text(&stage.query, true)?;

    let mut params = ParamBindings::new();
    for (name, value) in &stage.params {
        let resolved = match value {
            Value::String(s) => resolver.resolve_param(s)?,
            other => other.clone(),
        };
        params.insert(name.clone(), resolved);
    }
    params.extend(resolver.bound);

    Ok(ResolvedQuery {
        text,
        params,
        warnings: resolver.warnings,
        short_circuit: resolver.short_circuit,
    })
}

struct Resolver<'a> {
    stage: &'a Stage,
    context: &'a Context,
    registry: &'a SchemaRegistry,
    adapter: &'a dyn BackendAdapter,
    warnings: Vec<Warning>,
    bound: ParamBindings,
    next_param: usize,
    short_circuit: bool,
}

impl Resolver<'_> {
    /// Substitute every placeholder in `template`. With `bindable` the
    /// adapter may answer with a named parameter instead of a text splice.
    fn resolve_text(&mut self, template: &str, bindable: bool) -> Result<String> {
        let refs = scan_placeholders(template)
            .map_err(|e| ExecError::InvalidPlan(format!("stage {}: {e}", self.stage.index)))?;
        if refs.is_empty() {
            return Ok(template.to_string());
        }

        let mut out = String::with_capacity(template.len());
        let mut cursor = 0;
        for r in refs {
            let (value, target) = self.extract(&r)?;
            out.push_str(&template[cursor..r.start]);
            if bindable {
                match self.translate(&r, &value, target)? {
                    Translated::Literal(text) => out.push_str(&text),
                    Translated::Bound(json) => {
                        let name = format!("trident_p{}", self.next_param);
                        self.next_param += 1;
                        out.push('$');
                        out.push_str(&name);
                        self.bound.insert(name, json);
                    }
                }
            } else {
                out.push_str(&scalar_text(&value));
            }
            cursor = r.end;
        }
        out.push_str(&template[cursor..]);
        Ok(out)
    }

    /// Resolve one string-valued stage parameter.
    ///
    /// A parameter that is exactly one placeholder token keeps the resolved
    /// value's JSON type; anything else is treated as a text template.
    fn resolve_param(&mut self, raw: &str) -> Result<Value> {
        let refs = scan_placeholders(raw)
            .map_err(|e| ExecError::InvalidPlan(format!("stage {}: {e}", self.stage.index)))?;
        match refs.as_slice() {
            [] => Ok(Value::String(raw.to_string())),
            [only] if only.start == 0 && only.end == raw.len() => {
                let r = only.clone();
                let (value, _) = self.extract(&r)?;
                Ok(value.to_json())
            }
            _ => Ok(Value::String(self.resolve_text(raw, false)?)),
        }
    }

    /// Pull the referenced values out of the context and coerce them to the
    /// target field's semantic type.
    fn extract(&mut self, r: &PlaceholderRef) -> Result<(ScalarValue, SemType)> {
        let idx = self.stage.index;
        if r.stage >= idx {
            return Err(ExecError::UnresolvedReference {
                stage: idx,
                token: r.token.clone(),
            });
        }
        let source = self
            .context
            .get(r.stage)
            .ok_or_else(|| ExecError::UnresolvedReference {
                stage: idx,
                token: r.token.clone(),
            })?;

        let values: Vec<&Value> = source
            .rows
            .iter()
            .filter_map(|row| lookup_path(row, &r.path))
            .collect();

        if values.is_empty() {
            match r.policy {
                // An empty list substitution can only match nothing.
                Some(AggPolicy::List) | Some(AggPolicy::DistinctList) => {
                    self.short_circuit = true;
                    return Ok((ScalarValue::List(Vec::new()), SemType::Unknown));
                }
                _ => {
                    return Err(ExecError::UnresolvedReference {
                        stage: idx,
                        token: r.token.clone(),
                    })
                }
            }
        }

        let picked = match r.policy {
            Some(AggPolicy::First) => ScalarValue::from_json(values[0]),
            Some(AggPolicy::List) => {
                ScalarValue::List(values.iter().map(|v| ScalarValue::from_json(v)).collect())
            }
            Some(AggPolicy::DistinctList) => {
                let mut distinct: Vec<&Value> = Vec::new();
                for v in &values {
                    if !distinct.contains(v) {
                        distinct.push(v);
                    }
                }
                ScalarValue::List(distinct.iter().map(|v| ScalarValue::from_json(v)).collect())
            }
            None => {
                let mut distinct: Vec<&Value> = Vec::new();
                for v in &values {
                    if !distinct.contains(v) {
                        distinct.push(v);
                    }
                }
                if distinct.len() > 1 {
                    let warning = Warning::MultipleValues {
                        stage: idx,
                        token: r.token.clone(),
                        distinct: distinct.len(),
                    };
                    if !self.warnings.contains(&warning) {
                        self.warnings.push(warning);
                    }
                }
                ScalarValue::from_json(values[0])
            }
        };

        let snapshot = self.registry.get(self.stage.backend)?;
        let target = snapshot
            .field_type(&r.path)
            .ok_or_else(|| ExecError::CoercionError {
                stage: idx,
                field: r.path.clone(),
                reason: format!(
                    "field is not in the {} schema",
                    self.stage.backend
                ),
            })?;

        let coerced = coerce(&picked, target).map_err(|reason| ExecError::CoercionError {
            stage: idx,
            field: r.path.clone(),
            reason,
        })?;
        Ok((coerced, target))
    }

    fn translate(
        &self,
        r: &PlaceholderRef,
        value: &ScalarValue,
        target: SemType,
    ) -> Result<Translated> {
        self.adapter
            .translate_value(value, target)
            .map_err(|source| ExecError::CoercionError {
                stage: self.stage.index,
                field: r.path.clone(),
                reason: source.to_string(),
            })
    }
}

/// Walk a dotted path through nested JSON objects.
fn lookup_path<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = row;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Lossless coercion to a target semantic type; anything lossy is an error.
fn coerce(value: &ScalarValue, target: SemType) -> Result<ScalarValue, String> {
    // Unknown and Json targets accept anything as-is.
    if matches!(target, SemType::Unknown | SemType::Json) {
        return Ok(value.clone());
    }
    let fail = || {
        Err(format!(
            "cannot losslessly convert {} to {target:?}",
            value.type_name()
        ))
    };
    match value {
        ScalarValue::Null => Ok(ScalarValue::Null),
        ScalarValue::List(items) => {
            let coerced = items
                .iter()
                .map(|item| coerce(item, target))
                .collect::<Result<Vec<_>, String>>()?;
            Ok(ScalarValue::List(coerced))
        }
        ScalarValue::Int(v) => match target {
            SemType::Integer => Ok(value.clone()),
            SemType::Float => Ok(ScalarValue::Float(*v as f64)),
            SemType::Text => Ok(ScalarValue::Text(v.to_string())),
            _ => fail(),
        },
        ScalarValue::Float(v) => match target {
            SemType::Float => Ok(value.clone()),
            SemType::Integer if v.fract() == 0.0 && v.is_finite() => {
                Ok(ScalarValue::Int(*v as i64))
            }
            SemType::Text => Ok(ScalarValue::Text(v.to_string())),
            _ => fail(),
        },
        ScalarValue::Bool(v) => match target {
            SemType::Boolean => Ok(value.clone()),
            SemType::Text => Ok(ScalarValue::Text(v.to_string())),
            _ => fail(),
        },
        ScalarValue::Text(s) => match target {
            // Timestamps travel as their text form.
            SemType::Text | SemType::Timestamp => Ok(value.clone()),
            SemType::Integer => match s.trim().parse::<i64>() {
                Ok(v) => Ok(ScalarValue::Int(v)),
                Err(_) => fail(),
            },
            SemType::Float => match s.trim().parse::<f64>() {
                Ok(v) => Ok(ScalarValue::Float(v)),
                Err(_) => fail(),
            },
            _ => fail(),
        },
    }
}

/// Plain-text rendering for placeholders embedded in a larger string.
fn scalar_text(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Null => "null".to_string(),
        ScalarValue::Bool(v) => v.to_string(),
        ScalarValue::Int(v) => v.to_string(),
        ScalarValue::Float(v) => v.to_string(),
        ScalarValue::Text(s) => s.clone(),
        ScalarValue::List(items) => items
            .iter()
            .map(scalar_text)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

#[cfg(test)]
mod tests {
    use datasources::debug::DebugAdapter;
    use datasources::ResultSet;
    use schemastore::registry::StaticSchemaSource;
    use schemastore::BackendKind;
    use serde_json::json;

    use super::*;

    #[test]
    fn scans_tokens_with_policies() {
        let refs = scan_placeholders(
            "SELECT * FROM movies WHERE id IN ({{0.id|list}}) AND year > {{ 1.year }}",
        )
        .unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].stage, 0);
        assert_eq!(refs[0].path, "id");
        assert_eq!(refs[0].policy, Some(AggPolicy::List));
        assert_eq!(refs[1].stage, 1);
        assert_eq!(refs[1].policy, None);
        assert_eq!(refs[1].token, "{{ 1.year }}");
    }

    #[test]
    fn scans_dotted_paths() {
        let refs = scan_placeholders("{{0.movie.title|distinct-list}}").unwrap();
        assert_eq!(refs[0].path, "movie.title");
        assert_eq!(refs[0].policy, Some(AggPolicy::DistinctList));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(scan_placeholders("WHERE id = {{0.id").is_err());
        assert!(scan_placeholders("WHERE id = {{id}}").is_err());
        assert!(scan_placeholders("{{0.id|bogus}}").is_err());
    }

    #[test]
    fn no_tokens_is_fine() {
        assert!(scan_placeholders("SELECT 1").unwrap().is_empty());
    }

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new(Box::new(StaticSchemaSource::new(json!({
            "postgres": {
                "movies": [["id", "integer"], ["title", "text"], ["rating", "numeric"]],
            },
        }))));
        registry.load(BackendKind::Postgres).unwrap();
        registry
    }

    fn stage(index: usize, query: &str) -> Stage {
        Stage {
            index,
            backend: BackendKind::Postgres,
            query: query.to_string(),
            params: Default::default(),
            output_label: None,
            description: None,
        }
    }

    fn context_with_rows(rows: Vec<Value>) -> Context {
        let mut context = Context::new();
        context.insert(0, ResultSet::new(BackendKind::Neo4j, rows));
        context
    }

    #[test]
    fn resolves_list_policy_into_sql_literal() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context = context_with_rows(vec![json!({"id": 1}), json!({"id": 2})]);
        let stage = stage(1, "SELECT title FROM movies WHERE id IN ({{0.id|list}})");

        let resolved = resolve_stage(&stage, &context, &registry(), &adapter).unwrap();
        assert_eq!(resolved.text, "SELECT title FROM movies WHERE id IN (1, 2)");
        assert!(!resolved.short_circuit);
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn default_policy_takes_first_and_warns_on_multiple_distinct() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context =
            context_with_rows(vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 1})]);
        let stage = stage(1, "SELECT title FROM movies WHERE id = {{0.id}}");

        let resolved = resolve_stage(&stage, &context, &registry(), &adapter).unwrap();
        assert_eq!(resolved.text, "SELECT title FROM movies WHERE id = 1");
        assert_eq!(
            resolved.warnings,
            vec![Warning::MultipleValues {
                stage: 1,
                token: "{{0.id}}".to_string(),
                distinct: 2,
            }]
        );
    }

    #[test]
    fn explicit_first_policy_does_not_warn() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context = context_with_rows(vec![json!({"id": 1}), json!({"id": 2})]);
        let stage = stage(1, "SELECT title FROM movies WHERE id = {{0.id|first}}");

        let resolved = resolve_stage(&stage, &context, &registry(), &adapter).unwrap();
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn distinct_list_deduplicates_preserving_order() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context = context_with_rows(vec![
            json!({"id": 3}),
            json!({"id": 1}),
            json!({"id": 3}),
        ]);
        let stage = stage(1, "SELECT 1 WHERE id IN ({{0.id|distinct-list}})");

        let resolved = resolve_stage(&stage, &context, &registry(), &adapter).unwrap();
        assert_eq!(resolved.text, "SELECT 1 WHERE id IN (3, 1)");
    }

    #[test]
    fn empty_source_with_list_policy_short_circuits() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context = context_with_rows(Vec::new());
        let stage = stage(1, "SELECT title FROM movies WHERE id IN ({{0.id|list}})");

        let resolved = resolve_stage(&stage, &context, &registry(), &adapter).unwrap();
        assert!(resolved.short_circuit);
    }

    #[test]
    fn empty_source_without_list_policy_is_unresolved() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context = context_with_rows(Vec::new());
        let stage = stage(1, "SELECT title FROM movies WHERE id = {{0.id}}");

        let err = resolve_stage(&stage, &context, &registry(), &adapter).unwrap_err();
        assert!(matches!(err, ExecError::UnresolvedReference { stage: 1, .. }));
    }

    #[test]
    fn field_missing_from_every_row_is_unresolved() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context = context_with_rows(vec![json!({"name": "x"})]);
        let stage = stage(1, "SELECT title FROM movies WHERE id = {{0.id}}");

        let err = resolve_stage(&stage, &context, &registry(), &adapter).unwrap_err();
        assert!(matches!(err, ExecError::UnresolvedReference { .. }));
    }

    #[test]
    fn reference_to_unexecuted_stage_is_unresolved() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context = context_with_rows(vec![json!({"id": 1})]);
        let stage = stage(1, "SELECT title FROM movies WHERE id = {{1.id}}");

        let err = resolve_stage(&stage, &context, &registry(), &adapter).unwrap_err();
        assert!(matches!(err, ExecError::UnresolvedReference { stage: 1, .. }));
    }

    #[test]
    fn unknown_target_field_fails_before_execution() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context = context_with_rows(vec![json!({"director": "Nolan"})]);
        let stage = stage(1, "SELECT title FROM movies WHERE director = {{0.director}}");

        let err = resolve_stage(&stage, &context, &registry(), &adapter).unwrap_err();
        assert!(matches!(err, ExecError::CoercionError { .. }));
    }

    #[test]
    fn text_literals_are_escaped() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context = context_with_rows(vec![json!({"title": "O'Brien"})]);
        let stage = stage(1, "SELECT 1 FROM movies WHERE title = {{0.title}}");

        let resolved = resolve_stage(&stage, &context, &registry(), &adapter).unwrap();
        assert_eq!(resolved.text, "SELECT 1 FROM movies WHERE title = 'O''Brien'");
    }

    #[test]
    fn whole_token_param_keeps_json_type() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context = context_with_rows(vec![json!({"id": 5}), json!({"id": 6})]);
        let mut s = stage(1, "SELECT 1");
        s.params
            .insert("ids".to_string(), json!("{{0.id|list}}"));

        let resolved = resolve_stage(&s, &context, &registry(), &adapter).unwrap();
        assert_eq!(resolved.params.get("ids"), Some(&json!([5, 6])));
    }

    #[test]
    fn embedded_param_token_splices_text() {
        let adapter = DebugAdapter::new(BackendKind::Postgres);
        let context = context_with_rows(vec![json!({"title": "Dune"})]);
        let mut s = stage(1, "SELECT 1");
        s.params
            .insert("q".to_string(), json!("title:{{0.title|first}}"));

        let resolved = resolve_stage(&s, &context, &registry(), &adapter).unwrap();
        assert_eq!(resolved.params.get("q"), Some(&json!("title:Dune")));
    }

    #[test]
    fn coercion_matrix() {
        use ScalarValue as S;
        assert_eq!(coerce(&S::Int(3), SemType::Float), Ok(S::Float(3.0)));
        assert_eq!(coerce(&S::Float(3.0), SemType::Integer), Ok(S::Int(3)));
        assert!(coerce(&S::Float(3.5), SemType::Integer).is_err());
        assert_eq!(
            coerce(&S::Text("42".to_string()), SemType::Integer),
            Ok(S::Int(42))
        );
        assert!(coerce(&S::Text("forty-two".to_string()), SemType::Integer).is_err());
        assert_eq!(coerce(&S::Int(3), SemType::Text), Ok(S::Text("3".to_string())));
        assert!(coerce(&S::Bool(true), SemType::Integer).is_err());
        assert_eq!(coerce(&S::Null, SemType::Integer), Ok(S::Null));
        // Unknown and Json targets pass values through untouched.
        assert_eq!(coerce(&S::Bool(true), SemType::Unknown), Ok(S::Bool(true)));
        assert_eq!(
            coerce(&S::List(vec![S::Int(1), S::Int(2)]), SemType::Text),
            Ok(S::List(vec![
                S::Text("1".to_string()),
                S::Text("2".to_string())
            ]))
        );
    }
}
