//! Postgres as a pipeline backend.
pub mod errors;

use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use schemastore::{BackendKind, SemType};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, Row};
use tracing::warn;

use crate::errors::Result;
use crate::{BackendAdapter, ParamBindings, ResultSet, ScalarValue, Translated};
use errors::PostgresError;

#[derive(Debug, Clone)]
pub enum PostgresConnection {
    ConnectionString(String),
    Parameters {
        host: String,
        port: Option<u16>,
        user: String,
        password: Option<String>,
        database: String,
    },
}

impl PostgresConnection {
    pub fn connection_string(&self) -> String {
        match self {
            Self::ConnectionString(s) => s.clone(),
            Self::Parameters {
                host,
                port,
                user,
                password,
                database,
            } => {
                let mut conn_str = format!("host={host} user={user} dbname={database}");
                if let Some(port) = port {
                    write!(&mut conn_str, " port={port}").unwrap();
                }
                if let Some(password) = password {
                    write!(&mut conn_str, " password={password}").unwrap();
                }
                conn_str
            }
        }
    }
}

/// Adapter owning a single Postgres connection.
///
/// Calls serialize through an async lock, so the adapter may be shared across
/// executions without interleaving queries on the wire.
pub struct PostgresAdapter {
    client: Mutex<Client>,
    conn_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PostgresAdapter {
    pub async fn connect(conn: &PostgresConnection) -> Result<PostgresAdapter, PostgresError> {
        let (client, connection) =
            tokio_postgres::connect(&conn.connection_string(), NoTls).await?;
        let handle = tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(%err, "postgres connection errored");
            }
        });
        Ok(PostgresAdapter {
            client: Mutex::new(client),
            conn_handle: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl BackendAdapter for PostgresAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn execute(&self, query: &str, params: &ParamBindings) -> Result<ResultSet> {
        let query = splice_named_params(query, params);
        let client = self.client.lock().await;
        let rows = client
            .query(&query, &[])
            .await
            .map_err(PostgresError::from)?;
        drop(client);

        let rows = rows
            .iter()
            .map(row_to_json)
            .collect::<Result<Vec<_>, PostgresError>>()?;
        Ok(ResultSet::new(BackendKind::Postgres, rows))
    }

    fn translate_value(&self, value: &ScalarValue, target: SemType) -> Result<Translated> {
        Ok(Translated::Literal(sql_literal(value, target)))
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(PostgresError::from)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(handle) = self.conn_handle.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

/// Render a SQL literal for a resolved placeholder value.
///
/// Lists render as a comma-separated run of literals for splicing into an
/// `IN (...)` clause.
pub fn sql_literal(value: &ScalarValue, target: SemType) -> String {
    match value {
        ScalarValue::Null => "NULL".to_string(),
        ScalarValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        ScalarValue::Int(v) => v.to_string(),
        ScalarValue::Float(v) => v.to_string(),
        ScalarValue::Text(s) => quote_literal(s),
        ScalarValue::List(items) => items
            .iter()
            .map(|item| sql_literal(item, target))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Single-quote a string literal, doubling embedded quotes.
fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Splice stage-level named bindings (`$name`) into the query as escaped
/// literals. The single connection executes the final text directly.
fn splice_named_params(query: &str, params: &ParamBindings) -> String {
    if params.is_empty() {
        return query.to_string();
    }
    // Longest names first so a binding never clobbers the prefix of a
    // longer one ($min vs $min_rating).
    let mut ordered: Vec<_> = params.iter().collect();
    ordered.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));

    let mut out = query.to_string();
    for (name, value) in ordered {
        let token = format!("${name}");
        let literal = sql_literal(&ScalarValue::from_json(value), SemType::Unknown);
        out = out.replace(&token, &literal);
    }
    out
}

fn row_to_json(row: &Row) -> Result<Value, PostgresError> {
    let mut obj = serde_json::Map::with_capacity(row.columns().len());
    for (idx, col) in row.columns().iter().enumerate() {
        let ty = col.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?.map(Value::from)
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?.map(Value::from)
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?.map(Value::from)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)?.map(Value::from)
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)?.map(Value::from)
        } else if *ty == Type::NUMERIC {
            // NUMERIC surfaces as a float in the JSON row shape.
            row.try_get::<_, Option<Decimal>>(idx)?
                .and_then(|d| d.to_f64())
                .map(Value::from)
        } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
        {
            row.try_get::<_, Option<String>>(idx)?.map(Value::String)
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(|v| Value::String(v.to_string()))
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<DateTime<Utc>>>(idx)?
                .map(|v| Value::String(v.to_rfc3339()))
        } else if *ty == Type::DATE {
            row.try_get::<_, Option<NaiveDate>>(idx)?
                .map(|v| Value::String(v.to_string()))
        } else if *ty == Type::UUID {
            row.try_get::<_, Option<uuid::Uuid>>(idx)?
                .map(|v| Value::String(v.to_string()))
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            row.try_get::<_, Option<Value>>(idx)?
        } else {
            return Err(PostgresError::UnsupportedType {
                column: col.name().to_string(),
                declared: ty.to_string(),
            });
        };
        obj.insert(col.name().to_string(), value.unwrap_or(Value::Null));
    }
    Ok(Value::Object(obj))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn literals_escape_quotes() {
        assert_eq!(
            sql_literal(&ScalarValue::Text("O'Brien".to_string()), SemType::Text),
            "'O''Brien'"
        );
        assert_eq!(sql_literal(&ScalarValue::Int(7), SemType::Integer), "7");
        assert_eq!(sql_literal(&ScalarValue::Null, SemType::Text), "NULL");
        assert_eq!(
            sql_literal(&ScalarValue::Bool(true), SemType::Boolean),
            "TRUE"
        );
    }

    #[test]
    fn list_literal_joins_for_in_clause() {
        let list = ScalarValue::List(vec![
            ScalarValue::Int(1),
            ScalarValue::Text("a'b".to_string()),
            ScalarValue::Int(3),
        ]);
        assert_eq!(sql_literal(&list, SemType::Unknown), "1, 'a''b', 3");
    }

    #[test]
    fn named_params_splice_as_literals() {
        let mut params = ParamBindings::new();
        params.insert("min_rating".to_string(), json!(8.5));
        params.insert("genre".to_string(), json!("Action"));
        let out = splice_named_params(
            "SELECT * FROM movies WHERE rating > $min_rating AND genre = $genre",
            &params,
        );
        assert_eq!(
            out,
            "SELECT * FROM movies WHERE rating > 8.5 AND genre = 'Action'"
        );
    }

    #[test]
    fn prefix_overlapping_param_names_do_not_collide() {
        let mut params = ParamBindings::new();
        params.insert("min".to_string(), json!(5));
        params.insert("min_rating".to_string(), json!(8.5));
        let out = splice_named_params(
            "SELECT * FROM movies WHERE rating > $min_rating AND votes > $min",
            &params,
        );
        assert_eq!(
            out,
            "SELECT * FROM movies WHERE rating > 8.5 AND votes > 5"
        );
    }

    #[test]
    fn connection_string_from_parameters() {
        let conn = PostgresConnection::Parameters {
            host: "localhost".to_string(),
            port: Some(5432),
            user: "app".to_string(),
            password: Some("secret".to_string()),
            database: "movies".to_string(),
        };
        assert_eq!(
            conn.connection_string(),
            "host=localhost user=app dbname=movies port=5432 password=secret"
        );
    }
}
