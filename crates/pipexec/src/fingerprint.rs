//! Plan fingerprints for the result cache.

use std::fmt;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::plan::Plan;

/// Deterministic hash of a normalized plan, used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collapse whitespace runs so template formatting doesn't change the key.
/// Casing is preserved; collapsing it would conflate case-sensitive literals.
fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn fingerprint(plan: &Plan) -> Fingerprint {
    let mut hasher = Sha256::new();
    for stage in &plan.stages {
        hasher.update(stage.backend.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(normalize_ws(&stage.query).as_bytes());
        hasher.update(b"\n");
        // Bindings serialize in insertion order, making parameter order part
        // of the key.
        hasher.update(serde_json::to_string(&stage.params).unwrap_or_default());
        hasher.update(b"\n");
        if let Some(label) = &stage.output_label {
            hasher.update(label.as_bytes());
        }
        hasher.update(b"\x1e");
    }

    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        write!(&mut out, "{byte:02x}").unwrap();
    }
    Fingerprint(out)
}

#[cfg(test)]
mod tests {
    use schemastore::BackendKind;

    use super::*;
    use crate::plan::Stage;

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

    #[test]
    fn deterministic() {
        let plan = Plan::new(vec![stage(0, "SELECT id FROM movies")]);
        assert_eq!(fingerprint(&plan), fingerprint(&plan));
    }

    #[test]
    fn whitespace_insensitive_in_templates() {
        let a = Plan::new(vec![stage(0, "SELECT id   FROM movies")]);
        let b = Plan::new(vec![stage(0, "SELECT id\n  FROM\tmovies")]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn casing_is_significant() {
        let a = Plan::new(vec![stage(0, "SELECT 'Action'")]);
        let b = Plan::new(vec![stage(0, "SELECT 'action'")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn stage_order_is_significant() {
        let a = Plan::new(vec![stage(0, "SELECT 1"), stage(1, "SELECT 2")]);
        let b = Plan::new(vec![stage(0, "SELECT 2"), stage(1, "SELECT 1")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn param_order_is_significant() {
        let mut a = stage(0, "SELECT 1");
        a.params.insert("x".to_string(), serde_json::json!(1));
        a.params.insert("y".to_string(), serde_json::json!(2));

        let mut b = stage(0, "SELECT 1");
        b.params.insert("y".to_string(), serde_json::json!(2));
        b.params.insert("x".to_string(), serde_json::json!(1));

        assert_ne!(
            fingerprint(&Plan::new(vec![a])),
            fingerprint(&Plan::new(vec![b]))
        );
    }

    #[test]
    fn output_label_is_significant() {
        let mut labeled = stage(0, "SELECT 1");
        labeled.output_label = Some("movies".to_string());
        assert_ne!(
            fingerprint(&Plan::new(vec![stage(0, "SELECT 1")])),
            fingerprint(&Plan::new(vec![labeled]))
        );
    }
}
