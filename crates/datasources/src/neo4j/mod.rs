//! Neo4j over the HTTP transactional Cypher endpoint.
//!
//! Speaks `POST /db/{database}/tx/commit` directly through a JSON client
//! rather than pulling in a bolt driver. The HTTP client is stateless and
//! safe to share across executions.
pub mod errors;

use async_trait::async_trait;
use schemastore::{BackendKind, SemType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use crate::errors::Result;
use crate::{BackendAdapter, ParamBindings, ResultSet, ScalarValue, Translated};
use errors::Neo4jError;

const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Neo4jConnection {
    /// Base HTTP URI, e.g. `http://localhost:7474`.
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Neo4jConnection {
    pub fn tx_commit_url(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.uri.trim_end_matches('/'),
            self.database
        )
    }
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statements: Vec<Statement<'a>>,
}

#[derive(Debug, Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: &'a ParamBindings,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    columns: Vec<String>,
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

pub struct Neo4jAdapter {
    conn: Neo4jConnection,
    client: reqwest::Client,
}

impl Neo4jAdapter {
    pub fn new(conn: Neo4jConnection) -> Result<Neo4jAdapter, Neo4jError> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()?;
        Ok(Neo4jAdapter { conn, client })
    }

    async fn run_statement(
        &self,
        statement: &str,
        parameters: &ParamBindings,
    ) -> Result<TxResponse, Neo4jError> {
        let body = StatementRequest {
            statements: vec![Statement {
                statement,
                parameters,
            }],
        };
        let res = self
            .client
            .post(self.conn.tx_commit_url())
            .basic_auth(&self.conn.user, Some(&self.conn.password))
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(Neo4jError::Http(res.status()));
        }

        let res: TxResponse = res.json().await?;
        trace!(results = res.results.len(), "neo4j response");

        if let Some(err) = res.errors.first() {
            return Err(Neo4jError::Server {
                code: err.code.clone(),
                message: err.message.clone(),
            });
        }
        Ok(res)
    }
}

#[async_trait]
impl BackendAdapter for Neo4jAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Neo4j
    }

    async fn execute(&self, query: &str, params: &ParamBindings) -> Result<ResultSet> {
        let res = self.run_statement(query, params).await?;
        let TxResult { columns, data } = res
            .results
            .into_iter()
            .next()
            .ok_or_else(|| Neo4jError::MalformedResponse("response had no results".to_string()))?;

        let rows = data
            .into_iter()
            .map(|entry| {
                let mut obj = Map::with_capacity(columns.len());
                for (column, value) in columns.iter().zip(entry.row) {
                    obj.insert(column.clone(), value);
                }
                Value::Object(obj)
            })
            .collect();
        Ok(ResultSet::new(BackendKind::Neo4j, rows))
    }

    fn translate_value(&self, value: &ScalarValue, _target: SemType) -> Result<Translated> {
        // Scalars bind as real Cypher parameters. Lists splice as literal
        // elements because templates carry their own brackets
        // (`WHERE m.id IN [{{0.id|list}}]`); binding the array whole would
        // nest it inside those brackets and match nothing.
        match value {
            ScalarValue::List(items) => {
                let parts = items
                    .iter()
                    .map(cypher_literal)
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(Translated::Literal(parts))
            }
            other => Ok(Translated::Bound(other.to_json())),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.run_statement("RETURN 1", &ParamBindings::new())
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Render one Cypher literal, escaping backslashes and quotes in strings.
fn cypher_literal(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Null => "null".to_string(),
        ScalarValue::Bool(b) => b.to_string(),
        ScalarValue::Int(v) => v.to_string(),
        ScalarValue::Float(v) => v.to_string(),
        ScalarValue::Text(s) => {
            let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
            format!("'{escaped}'")
        }
        ScalarValue::List(items) => {
            let parts = items
                .iter()
                .map(cypher_literal)
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{parts}]")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> Neo4jAdapter {
        Neo4jAdapter::new(Neo4jConnection {
            uri: "http://localhost:7474".to_string(),
            user: "neo4j".to_string(),
            password: "secret".to_string(),
            database: "neo4j".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn scalars_bind_as_parameters() {
        let translated = adapter()
            .translate_value(&ScalarValue::Int(7), SemType::Integer)
            .unwrap();
        assert_eq!(translated, Translated::Bound(serde_json::json!(7)));
    }

    #[test]
    fn lists_splice_into_template_brackets() {
        let list = ScalarValue::List(vec![
            ScalarValue::Int(1),
            ScalarValue::Text("O'Hara".to_string()),
        ]);
        let translated = adapter().translate_value(&list, SemType::Unknown).unwrap();
        // The template supplies the surrounding `[...]`.
        assert_eq!(
            translated,
            Translated::Literal("1, 'O\\'Hara'".to_string())
        );
    }

    #[test]
    fn tx_commit_url_strips_trailing_slash() {
        let conn = Neo4jConnection {
            uri: "http://localhost:7474/".to_string(),
            user: "neo4j".to_string(),
            password: "secret".to_string(),
            database: "neo4j".to_string(),
        };
        assert_eq!(conn.tx_commit_url(), "http://localhost:7474/db/neo4j/tx/commit");
    }

    #[test]
    fn response_rows_zip_with_columns() {
        let raw = serde_json::json!({
            "results": [{
                "columns": ["name", "born"],
                "data": [
                    { "row": ["Keanu Reeves", 1964] },
                    { "row": ["Carrie-Anne Moss", 1967] },
                ],
            }],
            "errors": [],
        });
        let res: TxResponse = serde_json::from_value(raw).unwrap();
        assert!(res.errors.is_empty());
        let result = &res.results[0];
        assert_eq!(result.columns, vec!["name", "born"]);
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].row[1], serde_json::json!(1964));
    }

    #[test]
    fn server_errors_classify_by_code() {
        let transient = Neo4jError::Server {
            code: "Neo.TransientError.Transaction.DeadlockDetected".to_string(),
            message: "deadlock".to_string(),
        };
        assert_eq!(transient.classify(), crate::errors::ErrorClass::Transient);

        let permanent = Neo4jError::Server {
            code: "Neo.ClientError.Statement.SyntaxError".to_string(),
            message: "bad cypher".to_string(),
        };
        assert_eq!(permanent.classify(), crate::errors::ErrorClass::Permanent);
    }
}
