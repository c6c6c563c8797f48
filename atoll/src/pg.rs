//! PostgreSQL store backend.
//!
//! Connection pooling uses deadpool-postgres; one pooled connection rides
//! inside each [`Session`] and goes back to the pool when the dispatcher
//! releases it. [`PgStore`] renders translated filter predicates through
//! `FilterExpr::to_sql`, so SQL and in-memory filtering share one
//! operator table.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use atoll_core::filter::{Direction, FilterExpr, OrderBy};

use crate::error::{ApiError, ApiResult};
use crate::model::{LazyQuery, Session, SessionBackend, SessionFactory, Store};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "atoll".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PgConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("ATOLL_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("ATOLL_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("ATOLL_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("ATOLL_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("ATOLL_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("ATOLL_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: Duration::from_secs(
                std::env::var("ATOLL_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// SESSIONS OVER THE POOL
// ============================================================================

/// Session backend holding one pooled connection.
pub struct PgSession {
    conn: Mutex<Option<Object>>,
}

impl PgSession {
    fn new(conn: Object) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Borrow the pooled connection; fails if the session was already
    /// released.
    pub async fn client(&self) -> ApiResult<tokio::sync::MappedMutexGuard<'_, Object>> {
        let guard = self.conn.lock().await;
        MutexGuard::try_map(guard, |conn| conn.as_mut())
            .map_err(|_| ApiError::service_unavailable("Database session already released"))
    }
}

impl SessionBackend for PgSession {
    fn release(&self) {
        // The dispatcher releases after the action finishes, so the lock
        // is uncontended here; a held lock means a query is still running
        // and the Drop backstop will return the connection instead.
        if let Ok(mut guard) = self.conn.try_lock() {
            *guard = None;
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Session factory over a deadpool pool; wrap it in [`crate::Db`].
#[derive(Clone)]
pub struct PgDb {
    pool: Pool,
}

impl PgDb {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &PgConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }
}

#[async_trait]
impl SessionFactory for PgDb {
    async fn session(&self) -> ApiResult<Session> {
        let conn = self.pool.get().await?;
        Ok(Session::new(PgSession::new(conn)))
    }
}

fn pg_session(session: &Session) -> ApiResult<&PgSession> {
    session
        .backend::<PgSession>()
        .ok_or_else(|| ApiError::internal_error("PgStore requires a PostgreSQL session"))
}

// ============================================================================
// SQL PARAMETERS
// ============================================================================

/// Owned SQL parameter bridging JSON operands to postgres types.
enum SqlParam {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    IntArray(Vec<i64>),
    TextArray(Vec<String>),
    Json(Value),
    Null,
}

impl SqlParam {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlParam::Int(i),
                None => SqlParam::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => SqlParam::Text(s),
            Value::Array(items) => array_param(items),
            other => SqlParam::Json(other),
        }
    }

    fn as_to_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Int(v) => v,
            SqlParam::Float(v) => v,
            SqlParam::Bool(v) => v,
            SqlParam::Text(v) => v,
            SqlParam::IntArray(v) => v,
            SqlParam::TextArray(v) => v,
            SqlParam::Json(v) => v,
            SqlParam::Null => &None::<i64>,
        }
    }
}

fn array_param(items: Vec<Value>) -> SqlParam {
    if items.iter().all(|v| v.as_i64().is_some()) {
        SqlParam::IntArray(items.iter().filter_map(Value::as_i64).collect())
    } else if items.iter().all(Value::is_string) {
        SqlParam::TextArray(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        )
    } else {
        SqlParam::Json(Value::Array(items))
    }
}

// ============================================================================
// POSTGRES STORE
// ============================================================================

/// Store over one table. Rows travel as `row_to_json` objects.
pub struct PgStore {
    table: &'static str,
    columns: Vec<&'static str>,
}

impl PgStore {
    pub fn new(table: &'static str, columns: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            table,
            columns: columns.into_iter().collect(),
        }
    }
}

fn where_clause(filters: &[FilterExpr]) -> (String, Vec<SqlParam>) {
    let mut clauses = Vec::with_capacity(filters.len());
    let mut params = Vec::new();
    let mut index = 1;
    for expr in filters {
        let (clause, values) = expr.to_sql(index);
        index += values.len();
        clauses.push(clause);
        params.extend(values.into_iter().map(SqlParam::from_value));
    }
    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (sql, params)
}

fn order_clause(ordering: &[OrderBy]) -> String {
    if ordering.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = ordering
        .iter()
        .map(|order| {
            let direction = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            format!("{} {}", order.field, direction)
        })
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

struct PgQuery {
    session: Session,
    table: &'static str,
    where_sql: String,
    order_sql: String,
    params: Vec<SqlParam>,
}

impl PgQuery {
    fn bound(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(SqlParam::as_to_sql).collect()
    }
}

#[async_trait]
impl LazyQuery for PgQuery {
    async fn count(&self) -> ApiResult<u64> {
        let backend = pg_session(&self.session)?;
        let client = backend.client().await?;
        let sql = format!("SELECT COUNT(*) FROM {}{}", self.table, self.where_sql);
        let row = client.query_one(&sql, &self.bound()).await?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }

    async fn fetch(&self, limit: u64, offset: u64) -> ApiResult<Vec<Value>> {
        let backend = pg_session(&self.session)?;
        let client = backend.client().await?;
        let next = self.params.len() + 1;
        let sql = format!(
            "SELECT row_to_json(t) FROM {} t{}{} LIMIT ${} OFFSET ${}",
            self.table,
            self.where_sql,
            self.order_sql,
            next,
            next + 1
        );
        let mut bound = self.bound();
        let limit = limit as i64;
        let offset = offset as i64;
        bound.push(&limit);
        bound.push(&offset);
        let rows = client.query(&sql, &bound).await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }
}

#[async_trait]
impl Store for PgStore {
    fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    async fn query(
        &self,
        session: &Session,
        filters: Vec<FilterExpr>,
        ordering: Vec<OrderBy>,
    ) -> ApiResult<Box<dyn LazyQuery>> {
        let (where_sql, params) = where_clause(&filters);
        Ok(Box::new(PgQuery {
            session: session.clone(),
            table: self.table,
            where_sql,
            order_sql: order_clause(&ordering),
            params,
        }))
    }

    async fn first(&self, session: &Session, id: i64) -> ApiResult<Option<Value>> {
        let backend = pg_session(session)?;
        let client = backend.client().await?;
        let sql = format!("SELECT row_to_json(t) FROM {} t WHERE id = $1", self.table);
        let row = client.query_opt(&sql, &[&id]).await?;
        Ok(row.map(|row| row.get(0)))
    }

    async fn create(&self, session: &Session, fields: Map<String, Value>) -> ApiResult<Value> {
        let backend = pg_session(session)?;
        let client = backend.client().await?;

        let mut names = Vec::new();
        let mut params = Vec::new();
        for (key, value) in fields {
            if key == "id" || !self.columns.contains(&key.as_str()) {
                continue;
            }
            names.push(key);
            params.push(SqlParam::from_value(value));
        }
        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} AS t ({}) VALUES ({}) RETURNING row_to_json(t)",
            self.table,
            names.join(", "),
            placeholders.join(", ")
        );
        let bound: Vec<&(dyn ToSql + Sync)> = params.iter().map(SqlParam::as_to_sql).collect();
        let row = client.query_one(&sql, &bound).await?;
        Ok(row.get(0))
    }

    async fn update(
        &self,
        session: &Session,
        id: i64,
        fields: Map<String, Value>,
    ) -> ApiResult<Value> {
        let backend = pg_session(session)?;
        let client = backend.client().await?;

        let mut assignments = Vec::new();
        let mut params: Vec<SqlParam> = vec![SqlParam::Int(id)];
        for (key, value) in fields {
            if key == "id" || !self.columns.contains(&key.as_str()) {
                continue;
            }
            assignments.push(format!("{} = ${}", key, params.len() + 1));
            params.push(SqlParam::from_value(value));
        }
        if assignments.is_empty() {
            return self
                .first(session, id)
                .await?
                .ok_or_else(|| ApiError::record_not_found(self.table, id));
        }
        let sql = format!(
            "UPDATE {} AS t SET {} WHERE id = $1 RETURNING row_to_json(t)",
            self.table,
            assignments.join(", ")
        );
        let bound: Vec<&(dyn ToSql + Sync)> = params.iter().map(SqlParam::as_to_sql).collect();
        let row = client
            .query_opt(&sql, &bound)
            .await?
            .ok_or_else(|| ApiError::record_not_found(self.table, id))?;
        Ok(row.get(0))
    }

    async fn delete(&self, session: &Session, id: i64) -> ApiResult<bool> {
        let backend = pg_session(session)?;
        let client = backend.client().await?;
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let affected = client.execute(&sql, &[&id]).await?;
        Ok(affected > 0)
    }
}
