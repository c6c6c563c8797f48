//! Model layer: request-scoped sessions and pluggable row stores.
//!
//! A [`Db`] hands out one [`Session`] per dispatched call. The dispatcher
//! releases the session exactly once after the action returns, success or
//! failure; a `Drop` backstop covers panics and early exits so a connection
//! can never leak past the response.
//!
//! A [`Store`] is the five-verb persistence seam behind model-backed
//! resources. Rows cross the seam as `serde_json::Value` objects, which is
//! what the envelopes and the proto bridge speak natively. [`MemoryStore`]
//! is the in-process backend; `pg::PgStore` speaks PostgreSQL through the
//! same trait.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use atoll_core::filter::{compare, Direction, FilterExpr, OrderBy};
use atoll_core::paginate::{paginate_slice, Page};
use atoll_core::ReturnTypeError;

use crate::error::{ApiError, ApiResult};

// ============================================================================
// SESSIONS
// ============================================================================

/// Connection state behind a [`Session`].
///
/// `release` must be idempotent-safe to skip: the session guarantees it is
/// called at most once.
pub trait SessionBackend: Send + Sync + 'static {
    /// Return the underlying connection to wherever it came from.
    fn release(&self);

    /// Downcast support for store backends that need their own session type.
    fn as_any(&self) -> &dyn Any;
}

struct NullBackend;

impl SessionBackend for NullBackend {
    fn release(&self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct SessionInner {
    backend: Box<dyn SessionBackend>,
    released: AtomicBool,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        // Backstop for panics and early returns; the dispatch path releases
        // explicitly before the response leaves.
        if !self.released.load(AtomicOrdering::SeqCst) {
            self.backend.release();
        }
    }
}

/// A request-scoped database session.
///
/// Cloning is cheap and shares the underlying connection; release happens
/// exactly once no matter how many clones exist.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(backend: impl SessionBackend) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                backend: Box::new(backend),
                released: AtomicBool::new(false),
            }),
        }
    }

    /// A session with no connection behind it, for stores that keep their
    /// own state.
    pub fn null() -> Self {
        Self::new(NullBackend)
    }

    /// Release the underlying connection. Only the first call has effect.
    pub fn release(&self) {
        if !self.inner.released.swap(true, AtomicOrdering::SeqCst) {
            self.inner.backend.release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(AtomicOrdering::SeqCst)
    }

    /// Borrow the backend as a concrete type.
    pub fn backend<T: SessionBackend>(&self) -> Option<&T> {
        self.inner.backend.as_any().downcast_ref()
    }
}

/// Hands out one session per dispatched call.
#[derive(Clone)]
pub struct Db {
    factory: Arc<dyn SessionFactory>,
}

/// Source of request-scoped sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    async fn session(&self) -> ApiResult<Session>;
}

struct DetachedFactory;

#[async_trait]
impl SessionFactory for DetachedFactory {
    async fn session(&self) -> ApiResult<Session> {
        Ok(Session::null())
    }
}

impl Db {
    pub fn new(factory: impl SessionFactory) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// A database handle whose sessions carry no connection. The default
    /// for in-memory stores and resources without a store.
    pub fn detached() -> Self {
        Self::new(DetachedFactory)
    }

    pub async fn session(&self) -> ApiResult<Session> {
        self.factory.session().await
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::detached()
    }
}

// ============================================================================
// STORES
// ============================================================================

/// A filtered, ordered query that has not fetched rows yet.
///
/// Counting and fetching are separate so a listing can report the full
/// total while materializing only one page.
#[async_trait]
pub trait LazyQuery: Send + Sync {
    /// Total matching rows, ignoring any window.
    async fn count(&self) -> ApiResult<u64>;

    /// Materialize one window of rows.
    async fn fetch(&self, limit: u64, offset: u64) -> ApiResult<Vec<Value>>;
}

/// Five-verb persistence seam for model-backed resources.
///
/// All verbs take the request session; backends that pool connections pull
/// theirs out of it. Rows are JSON objects keyed by column name.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Declared column names; filter translation validates against these.
    fn columns(&self) -> &[&'static str];

    /// Build a lazy query from translated predicates and ordering.
    async fn query(
        &self,
        session: &Session,
        filters: Vec<FilterExpr>,
        ordering: Vec<OrderBy>,
    ) -> ApiResult<Box<dyn LazyQuery>>;

    /// Fetch one row by primary key.
    async fn first(&self, session: &Session, id: i64) -> ApiResult<Option<Value>>;

    /// Insert a row, returning it with its assigned primary key.
    async fn create(&self, session: &Session, fields: Map<String, Value>) -> ApiResult<Value>;

    /// Merge fields into an existing row, returning the updated row.
    async fn update(
        &self,
        session: &Session,
        id: i64,
        fields: Map<String, Value>,
    ) -> ApiResult<Value>;

    /// Remove a row. `Ok(false)` means no row had that primary key.
    async fn delete(&self, session: &Session, id: i64) -> ApiResult<bool>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-process store over a shared row vector.
///
/// Filters evaluate through `FilterExpr::matches`, so the in-memory and
/// SQL backends agree on operator semantics.
pub struct MemoryStore {
    columns: Vec<&'static str>,
    rows: RwLock<Vec<Value>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new(columns: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            rows: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Seed initial rows; ids are assigned for rows that lack one.
    pub fn seed(self, rows: impl IntoIterator<Item = Value>) -> Self {
        {
            let mut guard = match self.rows.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for row in rows {
                guard.push(self.with_id(row));
            }
        }
        self
    }

    fn with_id(&self, row: Value) -> Value {
        let mut object = match row {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        match object.get("id").and_then(Value::as_i64) {
            Some(id) => {
                // Keep the allocator ahead of explicit ids.
                self.next_id.fetch_max(id + 1, AtomicOrdering::SeqCst);
            }
            None => {
                let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
                object.insert("id".to_string(), Value::from(id));
            }
        }
        Value::Object(object)
    }

    fn read_rows(&self) -> Vec<Value> {
        match self.rows.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn sort_rows(rows: &mut [Value], ordering: &[OrderBy]) {
    rows.sort_by(|a, b| {
        for order in ordering {
            let left = a.get(&order.field).unwrap_or(&Value::Null);
            let right = b.get(&order.field).unwrap_or(&Value::Null);
            let cmp = compare(left, right).unwrap_or(std::cmp::Ordering::Equal);
            let cmp = match order.direction {
                Direction::Asc => cmp,
                Direction::Desc => cmp.reverse(),
            };
            if cmp != std::cmp::Ordering::Equal {
                return cmp;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Materialized snapshot satisfying [`LazyQuery`].
struct MemoryQuery {
    rows: Vec<Value>,
}

#[async_trait]
impl LazyQuery for MemoryQuery {
    async fn count(&self) -> ApiResult<u64> {
        Ok(self.rows.len() as u64)
    }

    async fn fetch(&self, limit: u64, offset: u64) -> ApiResult<Vec<Value>> {
        Ok(self
            .rows
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    async fn query(
        &self,
        _session: &Session,
        filters: Vec<FilterExpr>,
        ordering: Vec<OrderBy>,
    ) -> ApiResult<Box<dyn LazyQuery>> {
        let mut rows: Vec<Value> = self
            .read_rows()
            .into_iter()
            .filter(|row| filters.iter().all(|expr| expr.matches(row)))
            .collect();
        sort_rows(&mut rows, &ordering);
        Ok(Box::new(MemoryQuery { rows }))
    }

    async fn first(&self, _session: &Session, id: i64) -> ApiResult<Option<Value>> {
        Ok(self
            .read_rows()
            .into_iter()
            .find(|row| row.get("id").and_then(Value::as_i64) == Some(id)))
    }

    async fn create(&self, _session: &Session, fields: Map<String, Value>) -> ApiResult<Value> {
        let row = self.with_id(Value::Object(fields));
        let mut guard = match self.rows.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        _session: &Session,
        id: i64,
        fields: Map<String, Value>,
    ) -> ApiResult<Value> {
        let mut guard = match self.rows.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let row = guard
            .iter_mut()
            .find(|row| row.get("id").and_then(Value::as_i64) == Some(id))
            .ok_or_else(|| ApiError::record_not_found("record", id))?;
        if let Value::Object(object) = row {
            for (key, value) in fields {
                if key == "id" {
                    continue;
                }
                object.insert(key, value);
            }
        }
        Ok(row.clone())
    }

    async fn delete(&self, _session: &Session, id: i64) -> ApiResult<bool> {
        let mut guard = match self.rows.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.len();
        guard.retain(|row| row.get("id").and_then(Value::as_i64) != Some(id));
        Ok(guard.len() < before)
    }
}

// ============================================================================
// LISTINGS
// ============================================================================

/// What a `list` action returns: either rows already in hand or a lazy
/// query still holding its window open.
pub enum Listing<T> {
    Items(Vec<T>),
    Query(Box<dyn LazyQuery>),
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(items: Vec<T>) -> Self {
        Listing::Items(items)
    }
}

impl<T> From<Box<dyn LazyQuery>> for Listing<T> {
    fn from(query: Box<dyn LazyQuery>) -> Self {
        Listing::Query(query)
    }
}

impl Listing<Value> {
    /// Accept a raw JSON value as a listing. Only an array qualifies; a
    /// singular value is the author's bug.
    pub fn try_from_value(value: Value) -> Result<Self, ReturnTypeError> {
        match value {
            Value::Array(items) => Ok(Listing::Items(items)),
            _ => Err(ReturnTypeError::new("list")),
        }
    }
}

impl<T: Serialize> Listing<T> {
    /// Serialize typed items down to JSON rows.
    pub fn into_values(self) -> ApiResult<Listing<Value>> {
        match self {
            Listing::Items(items) => {
                let values = items
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Listing::Items(values))
            }
            Listing::Query(query) => Ok(Listing::Query(query)),
        }
    }
}

/// Cut one page out of a listing. Materialized items paginate in place;
/// a lazy query counts first, then fetches only the window.
pub async fn paginate_listing(
    listing: Listing<Value>,
    limit: u64,
    offset: u64,
) -> ApiResult<Page<Value>> {
    match listing {
        Listing::Items(items) => Ok(paginate_slice(&items, limit, offset)),
        Listing::Query(query) => {
            let total = query.count().await?;
            let items = query.fetch(limit, offset).await?;
            Ok(Page {
                items,
                total,
                limit,
                offset,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atoll_core::filter::{translate, FilterOp};
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new(["id", "username", "age"]).seed([
            json!({ "username": "eorl", "age": 13 }),
            json!({ "username": "crystal", "age": 20 }),
            json!({ "username": "vivian", "age": 32 }),
        ])
    }

    #[tokio::test]
    async fn seeded_rows_get_sequential_ids() {
        let store = store();
        let session = Session::null();
        let row = store.first(&session, 2).await.unwrap().unwrap();
        assert_eq!(row["username"], json!("crystal"));
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let store = store();
        let session = Session::null();
        let mut filters = Map::new();
        filters.insert("age__gt".to_string(), json!(13));
        let exprs = translate(store.columns(), &filters).unwrap();
        let query = store
            .query(
                &session,
                exprs,
                vec![atoll_core::parse_ordering("-age")],
            )
            .await
            .unwrap();
        assert_eq!(query.count().await.unwrap(), 2);
        let rows = query.fetch(10, 0).await.unwrap();
        assert_eq!(rows[0]["username"], json!("vivian"));
        assert_eq!(rows[1]["username"], json!("crystal"));
    }

    #[tokio::test]
    async fn create_assigns_next_id() {
        let store = store();
        let session = Session::null();
        let mut fields = Map::new();
        fields.insert("username".to_string(), json!("newt"));
        fields.insert("age".to_string(), json!(7));
        let row = store.create(&session, fields).await.unwrap();
        assert_eq!(row["id"], json!(4));
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = store();
        let session = Session::null();
        let mut fields = Map::new();
        fields.insert("age".to_string(), json!(21));
        let row = store.update(&session, 2, fields).await.unwrap();
        assert_eq!(row["age"], json!(21));
        assert_eq!(row["username"], json!("crystal"));
    }

    #[tokio::test]
    async fn delete_reports_absence() {
        let store = store();
        let session = Session::null();
        assert!(store.delete(&session, 1).await.unwrap());
        assert!(!store.delete(&session, 1).await.unwrap());
    }

    #[test]
    fn session_releases_once() {
        struct Counting(Arc<AtomicI64>);
        impl SessionBackend for Counting {
            fn release(&self) {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let releases = Arc::new(AtomicI64::new(0));
        let session = Session::new(Counting(releases.clone()));
        let clone = session.clone();
        session.release();
        clone.release();
        drop(session);
        drop(clone);
        assert_eq!(releases.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn drop_backstop_releases_unreleased_session() {
        struct Counting(Arc<AtomicI64>);
        impl SessionBackend for Counting {
            fn release(&self) {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let releases = Arc::new(AtomicI64::new(0));
        drop(Session::new(Counting(releases.clone())));
        assert_eq!(releases.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listing_rejects_singular_value() {
        assert!(Listing::try_from_value(json!({ "id": 1 })).is_err());
        let listing = Listing::try_from_value(json!([{ "id": 1 }, { "id": 2 }])).unwrap();
        let page = paginate_listing(listing, 1, 1).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items, vec![json!({ "id": 2 })]);
    }
}
