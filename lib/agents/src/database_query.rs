//! Database query agent.
//!
//! One code path serves sqlite, postgresql, and mysql through sqlx's `Any`
//! driver. Connection pools are opened lazily on first use and cached per
//! connection string. Mutating operations commit immediately; `batch` wraps
//! its statements in one transaction and rolls the whole batch back on any
//! failure.
//!
//! Named `:name` parameters are rendered into the SQL as literals before
//! execution; values come from the agent input, never from an untrusted
//! second channel.
//!
//! Like the other side-effecting agents, failures come back as an error
//! payload with `operation_success: false`.

use crate::registry::Agent;
use agentflow_workflow::agent::{AgentInput, AgentMetadata, AgentOutcome};
use agentflow_workflow::error::AgentFailure;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value as JsonValue, json};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Row};
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

static DRIVERS: OnceLock<()> = OnceLock::new();

/// The database query agent.
pub struct DatabaseQueryAgent {
    pools: Mutex<HashMap<String, AnyPool>>,
}

struct DbSettings {
    db_type: String,
    url: String,
}

impl DbSettings {
    fn from_config(config: &JsonValue) -> Result<Self, AgentFailure> {
        let db_type = config
            .get("db_type")
            .and_then(JsonValue::as_str)
            .unwrap_or("sqlite")
            .to_string();

        if let Some(url) = config.get("connection_string").and_then(JsonValue::as_str) {
            return Ok(Self {
                db_type,
                url: url.to_string(),
            });
        }

        let host = config
            .get("host")
            .and_then(JsonValue::as_str)
            .unwrap_or("localhost");
        let port = config.get("port").and_then(JsonValue::as_u64).unwrap_or(5432);
        let database = config
            .get("database")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let username = config
            .get("username")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let password = config
            .get("password")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();

        let url = match db_type.as_str() {
            "postgresql" => {
                format!("postgres://{username}:{password}@{host}:{port}/{database}")
            }
            "mysql" => format!("mysql://{username}:{password}@{host}:{port}/{database}"),
            "sqlite" => format!("sqlite://{database}?mode=rwc"),
            other => {
                return Err(AgentFailure::InvalidInput {
                    message: format!("Unsupported database type: {other}"),
                });
            }
        };

        Ok(Self { db_type, url })
    }
}

impl DatabaseQueryAgent {
    /// Creates the agent with an empty pool cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }

    async fn pool(&self, settings: &DbSettings) -> Result<AnyPool, AgentFailure> {
        DRIVERS.get_or_init(sqlx::any::install_default_drivers);

        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(&settings.url) {
            return Ok(pool.clone());
        }

        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(&settings.url)
            .await
            .map_err(|e| AgentFailure::Transport {
                message: format!("failed to connect: {e}"),
            })?;
        pools.insert(settings.url.clone(), pool.clone());
        Ok(pool)
    }
}

impl Default for DatabaseQueryAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders `:name` parameters into the SQL as escaped literals.
fn bind_parameters(query: &str, parameters: &Map<String, JsonValue>) -> String {
    if parameters.is_empty() {
        return query.to_string();
    }
    static PARAM: OnceLock<Regex> = OnceLock::new();
    let pattern = PARAM.get_or_init(|| {
        Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("valid parameter pattern")
    });

    pattern
        .replace_all(query, |captures: &regex::Captures<'_>| {
            let name = &captures[1];
            match parameters.get(name) {
                Some(value) => sql_literal(value),
                None => captures[0].to_string(),
            }
        })
        .to_string()
}

fn sql_literal(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Decodes one row into a JSON object, column by column.
///
/// The `Any` driver has a narrow type vocabulary; datetimes arrive as
/// strings already in ISO-8601 form.
fn row_to_json(row: &AnyRow) -> Map<String, JsonValue> {
    let mut object = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<i64, _>(index) {
            json!(v)
        } else if let Ok(v) = row.try_get::<f64, _>(index) {
            json!(v)
        } else if let Ok(v) = row.try_get::<String, _>(index) {
            json!(v)
        } else if let Ok(v) = row.try_get::<bool, _>(index) {
            json!(v)
        } else {
            JsonValue::Null
        };
        object.insert(column.name().to_string(), value);
    }
    object
}

fn db_failure(error: &sqlx::Error) -> AgentFailure {
    AgentFailure::BadResponse {
        message: error.to_string(),
    }
}

async fn run_select(pool: &AnyPool, sql: &str) -> Result<JsonValue, AgentFailure> {
    let rows = sqlx::query(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| db_failure(&e))?;

    let columns: Vec<String> = rows.first().map_or_else(Vec::new, |row| {
        row.columns().iter().map(|c| c.name().to_string()).collect()
    });
    let data: Vec<JsonValue> = rows
        .iter()
        .map(|row| JsonValue::Object(row_to_json(row)))
        .collect();

    let row_count = data.len();
    Ok(json!({
        "data": data,
        "columns": columns,
        "row_count": row_count,
        "query": sql,
    }))
}

async fn run_mutation(
    pool: &AnyPool,
    sql: &str,
    operation: &str,
) -> Result<JsonValue, AgentFailure> {
    let result = sqlx::query(sql)
        .execute(pool)
        .await
        .map_err(|e| db_failure(&e))?;
    Ok(json!({
        "rows_affected": result.rows_affected(),
        "query": sql,
        "operation": operation,
    }))
}

async fn run_ddl(pool: &AnyPool, sql: &str, operation: &str) -> Result<JsonValue, AgentFailure> {
    sqlx::query(sql)
        .execute(pool)
        .await
        .map_err(|e| db_failure(&e))?;
    Ok(json!({
        "query": sql,
        "operation": operation,
        "success": true,
    }))
}

async fn describe_table(
    pool: &AnyPool,
    db_type: &str,
    table_name: &str,
) -> Result<JsonValue, AgentFailure> {
    let sql = match db_type {
        "postgresql" => format!(
            "SELECT column_name, data_type, is_nullable, column_default \
             FROM information_schema.columns WHERE table_name = '{}' \
             ORDER BY ordinal_position",
            table_name.replace('\'', "''")
        ),
        "mysql" => format!("DESCRIBE {table_name}"),
        "sqlite" => format!("PRAGMA table_info({table_name})"),
        other => {
            return Err(AgentFailure::InvalidInput {
                message: format!("Table description not supported for {other}"),
            });
        }
    };

    let description = run_select(pool, &sql).await?;
    let columns = description.get("data").cloned().unwrap_or_else(|| json!([]));
    let column_count = columns.as_array().map_or(0, Vec::len);
    Ok(json!({
        "table_name": table_name,
        "columns": columns,
        "column_count": column_count,
    }))
}

async fn list_tables(pool: &AnyPool, db_type: &str) -> Result<JsonValue, AgentFailure> {
    let sql = match db_type {
        "postgresql" => {
            "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'"
        }
        "mysql" => "SHOW TABLES",
        "sqlite" => "SELECT name FROM sqlite_master WHERE type='table'",
        other => {
            return Err(AgentFailure::InvalidInput {
                message: format!("Table listing not supported for {other}"),
            });
        }
    };

    let rows = sqlx::query(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| db_failure(&e))?;
    let tables: Vec<JsonValue> = rows
        .iter()
        .filter_map(|row| row.try_get::<String, _>(0).ok().map(JsonValue::from))
        .collect();

    let table_count = tables.len();
    Ok(json!({"tables": tables, "table_count": table_count}))
}

/// All-or-nothing: any statement failure rolls back the whole batch.
async fn run_batch(pool: &AnyPool, batch: &[JsonValue]) -> Result<JsonValue, AgentFailure> {
    let mut tx = pool.begin().await.map_err(|e| db_failure(&e))?;
    let mut results = Vec::new();

    for entry in batch {
        let Some(sql) = entry.get("query").and_then(JsonValue::as_str) else {
            continue;
        };
        let parameters = entry
            .get("parameters")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();
        let operation = entry
            .get("operation")
            .and_then(JsonValue::as_str)
            .unwrap_or("query");
        let bound = bind_parameters(sql, &parameters);

        match sqlx::query(&bound).execute(&mut *tx).await {
            Ok(done) => {
                let rows_affected = if matches!(operation, "insert" | "update" | "delete") {
                    done.rows_affected()
                } else {
                    0
                };
                results.push(json!({
                    "query": sql,
                    "operation": operation,
                    "success": true,
                    "rows_affected": rows_affected,
                }));
            }
            Err(error) => {
                tx.rollback().await.map_err(|e| db_failure(&e))?;
                return Err(AgentFailure::BadResponse {
                    message: format!("batch rolled back: {error}"),
                });
            }
        }
    }

    tx.commit().await.map_err(|e| db_failure(&e))?;
    let total = results.len();
    Ok(json!({
        "batch_results": results,
        "total_queries": total,
        "successful": total,
        "failed": 0,
    }))
}

async fn export_csv(
    pool: &AnyPool,
    sql: &str,
    output_path: &str,
) -> Result<JsonValue, AgentFailure> {
    let result = run_select(pool, sql).await?;
    let rows = result
        .get("data")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default();
    let columns: Vec<String> = result
        .get("columns")
        .and_then(JsonValue::as_array)
        .map(|list| {
            list.iter()
                .filter_map(JsonValue::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&columns)
        .map_err(|e| AgentFailure::Internal {
            message: e.to_string(),
        })?;
    for row in &rows {
        let record: Vec<String> = columns
            .iter()
            .map(|c| match row.get(c) {
                None | Some(JsonValue::Null) => String::new(),
                Some(JsonValue::String(s)) => s.clone(),
                Some(value) => value.to_string(),
            })
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| AgentFailure::Internal {
                message: e.to_string(),
            })?;
    }
    let bytes = writer.into_inner().map_err(|e| AgentFailure::Internal {
        message: e.to_string(),
    })?;
    tokio::fs::write(output_path, bytes)
        .await
        .map_err(|e| AgentFailure::Internal {
            message: e.to_string(),
        })?;

    Ok(json!({
        "output_path": output_path,
        "rows_exported": rows.len(),
        "columns_exported": columns.len(),
        "query": sql,
    }))
}

async fn import_csv(
    pool: &AnyPool,
    table_name: &str,
    csv_path: &str,
) -> Result<JsonValue, AgentFailure> {
    let content = tokio::fs::read_to_string(csv_path)
        .await
        .map_err(|_| AgentFailure::InvalidInput {
            message: format!("csv file not found: {csv_path}"),
        })?;

    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AgentFailure::InvalidInput {
            message: format!("invalid csv: {e}"),
        })?
        .iter()
        .map(ToString::to_string)
        .collect();

    let mut imported = 0u64;
    let mut tx = pool.begin().await.map_err(|e| db_failure(&e))?;
    for record in reader.records() {
        let record = record.map_err(|e| AgentFailure::InvalidInput {
            message: format!("invalid csv: {e}"),
        })?;
        let values: Vec<String> = record
            .iter()
            .map(|field| sql_literal(&json!(field)))
            .collect();
        let sql = format!(
            "INSERT INTO {table_name} ({}) VALUES ({})",
            headers.join(", "),
            values.join(", ")
        );
        sqlx::query(&sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_failure(&e))?;
        imported += 1;
    }
    tx.commit().await.map_err(|e| db_failure(&e))?;

    Ok(json!({
        "table_name": table_name,
        "rows_imported": imported,
        "columns_imported": headers.len(),
        "csv_path": csv_path,
    }))
}

#[async_trait]
impl Agent for DatabaseQueryAgent {
    async fn run(
        &self,
        config: &JsonValue,
        input: AgentInput,
        _cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentFailure> {
        let started_at = Utc::now();
        let operation = input.get_str("operation").unwrap_or("query").to_string();

        let attempt = async {
            let query = input
                .get_str("query")
                .ok_or_else(|| AgentFailure::InvalidInput {
                    message: "SQL query is required".to_string(),
                })?
                .to_string();
            let parameters = input
                .get("parameters")
                .and_then(JsonValue::as_object)
                .cloned()
                .unwrap_or_default();

            let settings = DbSettings::from_config(config)?;
            let pool = self.pool(&settings).await?;
            let bound = bind_parameters(&query, &parameters);

            match operation.as_str() {
                "query" => run_select(&pool, &bound).await,
                "insert" | "update" | "delete" => run_mutation(&pool, &bound, &operation).await,
                "create_table" | "drop_table" => run_ddl(&pool, &bound, &operation).await,
                // For describe_table the query text is the table name
                "describe_table" => describe_table(&pool, &settings.db_type, query.trim()).await,
                "list_tables" => list_tables(&pool, &settings.db_type).await,
                "batch" => {
                    let batch = input
                        .get("queries")
                        .and_then(JsonValue::as_array)
                        .cloned()
                        .unwrap_or_default();
                    run_batch(&pool, &batch).await
                }
                "export_csv" => {
                    let output_path = input.get_str("output_path").ok_or_else(|| {
                        AgentFailure::InvalidInput {
                            message: "output_path is required for export_csv".to_string(),
                        }
                    })?;
                    export_csv(&pool, &bound, output_path).await
                }
                "import_csv" => {
                    let csv_path =
                        input
                            .get_str("csv_path")
                            .ok_or_else(|| AgentFailure::InvalidInput {
                                message: "csv_path is required for import_csv".to_string(),
                            })?;
                    // For import_csv the query text is the table name
                    import_csv(&pool, query.trim(), csv_path).await
                }
                other => Err(AgentFailure::InvalidInput {
                    message: format!("Unsupported operation: {other}"),
                }),
            }
        }
        .await;

        let (output, variables) = match attempt {
            Ok(output) => {
                let rows_affected = output
                    .get("rows_affected")
                    .cloned()
                    .unwrap_or_else(|| json!(0));
                let mut variables = Map::new();
                variables.insert("operation_success".to_string(), json!(true));
                variables.insert("rows_affected".to_string(), rows_affected);
                variables.insert("operation_type".to_string(), json!(operation));
                (output, variables)
            }
            Err(error) => {
                tracing::error!(operation, error = %error, "database operation failed");
                let mut variables = Map::new();
                variables.insert("operation_success".to_string(), json!(false));
                variables.insert("error_message".to_string(), json!(error.to_string()));
                (json!({"error": error.to_string()}), variables)
            }
        };

        Ok(AgentOutcome {
            output,
            variables,
            metadata: AgentMetadata::spanning(started_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sqlite_config(dir: &tempfile::TempDir) -> JsonValue {
        let path = dir.path().join("test.db");
        json!({
            "db_type": "sqlite",
            "connection_string": format!("sqlite://{}?mode=rwc", path.to_string_lossy()),
        })
    }

    async fn run(agent: &DatabaseQueryAgent, config: &JsonValue, entries: &[(&str, JsonValue)]) -> AgentOutcome {
        let mut input = AgentInput::default();
        for (key, value) in entries {
            input.insert(*key, value.clone());
        }
        agent
            .run(config, input, &CancellationToken::new())
            .await
            .expect("agent runs")
    }

    #[tokio::test]
    async fn create_insert_query_lifecycle() {
        let dir = tempdir().expect("tempdir");
        let config = sqlite_config(&dir);
        let agent = DatabaseQueryAgent::new();

        let created = run(
            &agent,
            &config,
            &[
                ("operation", json!("create_table")),
                (
                    "query",
                    json!("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)"),
                ),
            ],
        )
        .await;
        assert_eq!(created.output["success"], json!(true));

        let inserted = run(
            &agent,
            &config,
            &[
                ("operation", json!("insert")),
                (
                    "query",
                    json!("INSERT INTO users (name, age) VALUES (:name, :age)"),
                ),
                ("parameters", json!({"name": "ada", "age": 36})),
            ],
        )
        .await;
        assert_eq!(inserted.output["rows_affected"], json!(1));
        assert_eq!(inserted.variables["rows_affected"], json!(1));

        let selected = run(
            &agent,
            &config,
            &[
                ("operation", json!("query")),
                ("query", json!("SELECT name, age FROM users WHERE age > :min")),
                ("parameters", json!({"min": 18})),
            ],
        )
        .await;
        assert_eq!(selected.output["row_count"], json!(1));
        assert_eq!(selected.output["data"][0]["name"], json!("ada"));
        assert_eq!(selected.output["data"][0]["age"], json!(36));
    }

    #[tokio::test]
    async fn batch_rolls_back_wholesale_on_failure() {
        let dir = tempdir().expect("tempdir");
        let config = sqlite_config(&dir);
        let agent = DatabaseQueryAgent::new();

        run(
            &agent,
            &config,
            &[
                ("operation", json!("create_table")),
                ("query", json!("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT)")),
            ],
        )
        .await;

        let batch = run(
            &agent,
            &config,
            &[
                ("operation", json!("batch")),
                ("query", json!("batch")),
                (
                    "queries",
                    json!([
                        {"query": "INSERT INTO items (label) VALUES ('first')", "operation": "insert"},
                        {"query": "INSERT INTO no_such_table (label) VALUES ('second')", "operation": "insert"},
                    ]),
                ),
            ],
        )
        .await;
        assert_eq!(batch.variables["operation_success"], json!(false));

        // The first insert was rolled back with the rest of the batch
        let remaining = run(
            &agent,
            &config,
            &[
                ("operation", json!("query")),
                ("query", json!("SELECT COUNT(*) AS n FROM items")),
            ],
        )
        .await;
        assert_eq!(remaining.output["data"][0]["n"], json!(0));
    }

    #[tokio::test]
    async fn successful_batch_commits_all() {
        let dir = tempdir().expect("tempdir");
        let config = sqlite_config(&dir);
        let agent = DatabaseQueryAgent::new();

        run(
            &agent,
            &config,
            &[
                ("operation", json!("create_table")),
                ("query", json!("CREATE TABLE logs (id INTEGER PRIMARY KEY, line TEXT)")),
            ],
        )
        .await;

        let batch = run(
            &agent,
            &config,
            &[
                ("operation", json!("batch")),
                ("query", json!("batch")),
                (
                    "queries",
                    json!([
                        {"query": "INSERT INTO logs (line) VALUES (:line)", "parameters": {"line": "one"}, "operation": "insert"},
                        {"query": "INSERT INTO logs (line) VALUES ('two')", "operation": "insert"},
                    ]),
                ),
            ],
        )
        .await;
        assert_eq!(batch.output["successful"], json!(2));
        assert_eq!(batch.output["failed"], json!(0));
    }

    #[tokio::test]
    async fn list_and_describe_tables() {
        let dir = tempdir().expect("tempdir");
        let config = sqlite_config(&dir);
        let agent = DatabaseQueryAgent::new();

        run(
            &agent,
            &config,
            &[
                ("operation", json!("create_table")),
                ("query", json!("CREATE TABLE things (id INTEGER PRIMARY KEY, label TEXT)")),
            ],
        )
        .await;

        let tables = run(
            &agent,
            &config,
            &[("operation", json!("list_tables")), ("query", json!("-"))],
        )
        .await;
        assert!(
            tables.output["tables"]
                .as_array()
                .unwrap()
                .iter()
                .any(|t| t == "things")
        );

        let described = run(
            &agent,
            &config,
            &[("operation", json!("describe_table")), ("query", json!("things"))],
        )
        .await;
        assert_eq!(described.output["table_name"], json!("things"));
        assert_eq!(described.output["column_count"], json!(2));
    }

    #[tokio::test]
    async fn export_and_import_csv() {
        let dir = tempdir().expect("tempdir");
        let config = sqlite_config(&dir);
        let agent = DatabaseQueryAgent::new();

        run(
            &agent,
            &config,
            &[
                ("operation", json!("create_table")),
                ("query", json!("CREATE TABLE people (name TEXT, age INTEGER)")),
            ],
        )
        .await;
        run(
            &agent,
            &config,
            &[
                ("operation", json!("insert")),
                ("query", json!("INSERT INTO people VALUES ('ada', 36)")),
            ],
        )
        .await;

        let csv_path = dir.path().join("people.csv").to_string_lossy().to_string();
        let exported = run(
            &agent,
            &config,
            &[
                ("operation", json!("export_csv")),
                ("query", json!("SELECT * FROM people")),
                ("output_path", json!(csv_path)),
            ],
        )
        .await;
        assert_eq!(exported.output["rows_exported"], json!(1));

        run(
            &agent,
            &config,
            &[
                ("operation", json!("create_table")),
                ("query", json!("CREATE TABLE people_copy (name TEXT, age INTEGER)")),
            ],
        )
        .await;
        let imported = run(
            &agent,
            &config,
            &[
                ("operation", json!("import_csv")),
                ("query", json!("people_copy")),
                ("csv_path", json!(csv_path)),
            ],
        )
        .await;
        assert_eq!(imported.output["rows_imported"], json!(1));
    }

    #[tokio::test]
    async fn missing_query_reports_error_output() {
        let dir = tempdir().expect("tempdir");
        let agent = DatabaseQueryAgent::new();
        let outcome = run(&agent, &sqlite_config(&dir), &[("operation", json!("query"))]).await;
        assert_eq!(outcome.variables["operation_success"], json!(false));
        assert!(
            outcome.output["error"]
                .as_str()
                .unwrap()
                .contains("SQL query is required")
        );
    }

    #[test]
    fn parameter_binding_escapes_strings() {
        let mut parameters = Map::new();
        parameters.insert("name".to_string(), json!("o'brien"));
        parameters.insert("age".to_string(), json!(41));
        let bound = bind_parameters(
            "SELECT * FROM t WHERE name = :name AND age > :age",
            &parameters,
        );
        assert_eq!(bound, "SELECT * FROM t WHERE name = 'o''brien' AND age > 41");
    }

    #[test]
    fn unknown_parameters_are_left_verbatim() {
        let mut parameters = Map::new();
        parameters.insert("a".to_string(), json!(1));
        let bound = bind_parameters("SELECT :a, :missing", &parameters);
        assert_eq!(bound, "SELECT 1, :missing");
    }
}
