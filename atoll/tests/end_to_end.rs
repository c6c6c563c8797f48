//! End-to-end HTTP tests driving generated routers through tower.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceExt;

use atoll::model::{SessionBackend, SessionFactory};
use atoll::{
    ActionRegistry, ApiResult, App, AppConfig, Context, CustomAction, Db, FilterDef, FilterType,
    Handler, MemoryStore, Method, Permission, Resource, Session, Store,
};

// ============================================================================
// FIXTURES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Greeting {
    id: i64,
    content: String,
}

/// Storeless resource overriding `get` directly.
struct Greeter;

#[async_trait]
impl Resource for Greeter {
    type Schema = Greeting;
    const NOUN: &'static str = "Greeter";

    fn actions() -> ActionRegistry<Self> {
        ActionRegistry::builder().get().build()
    }

    async fn get(&self, _cx: &Context, id: i64) -> ApiResult<Greeting> {
        Ok(Greeting {
            id,
            content: format!("hello, ID is {}", id),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    #[serde(default)]
    id: Option<i64>,
    username: String,
    age: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecentsInput {}

struct Recents;

#[async_trait]
impl Handler<Users> for Recents {
    type Input = RecentsInput;
    type Output = Value;

    async fn call(&self, _resource: &Users, _cx: &Context, _input: RecentsInput) -> ApiResult<Value> {
        Ok(json!({ "data": ["rustam", "crystal"] }))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SearchInput {
    q: String,
}

struct Search;

#[async_trait]
impl Handler<Users> for Search {
    type Input = SearchInput;
    type Output = Vec<String>;

    async fn call(&self, resource: &Users, cx: &Context, input: SearchInput) -> ApiResult<Vec<String>> {
        let listing = resource.list(cx, Default::default()).await?.into_values()?;
        let page = atoll::model::paginate_listing(listing, 100, 0).await?;
        Ok(page
            .items
            .iter()
            .filter_map(|row| row.get("username").and_then(Value::as_str))
            .filter(|name| name.contains(&input.q))
            .map(str::to_string)
            .collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PromoteInput {
    id: i64,
}

struct Promote;

#[async_trait]
impl Handler<Users> for Promote {
    type Input = PromoteInput;
    type Output = Value;

    async fn call(&self, _resource: &Users, _cx: &Context, input: PromoteInput) -> ApiResult<Value> {
        Ok(json!({ "id": input.id, "promoted": true }))
    }
}

struct Users {
    store: MemoryStore,
}

impl Users {
    fn seeded() -> Self {
        Self {
            store: MemoryStore::new(["id", "username", "age"]).seed([
                json!({ "username": "eorl", "age": 13 }),
                json!({ "username": "crystal", "age": 20 }),
                json!({ "username": "rustam", "age": 32 }),
            ]),
        }
    }
}

#[async_trait]
impl Resource for Users {
    type Schema = User;
    const NOUN: &'static str = "User";

    fn actions() -> ActionRegistry<Self> {
        ActionRegistry::builder()
            .crud()
            .custom(CustomAction::new("recents", Recents).methods([Method::Get]))
            .custom(CustomAction::new("search", Search).methods([Method::Get]))
            .custom(CustomAction::new("promote", Promote).detail())
            .build()
    }

    fn filters(&self) -> Vec<FilterDef> {
        vec![
            FilterDef::new("username__like", FilterType::Text),
            FilterDef::new("age__gt", FilterType::Int),
        ]
    }

    fn store(&self) -> Option<&dyn Store> {
        Some(&self.store)
    }
}

fn users_router() -> axum::Router {
    App::new(AppConfig::default())
        .mount(Users::seeded())
        .unwrap()
        .into_router()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response<axum::body::Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// GENERIC ROUTES
// ============================================================================

#[tokio::test]
async fn storeless_resource_serves_an_overridden_get() {
    let app = App::new(AppConfig::default())
        .mount(Greeter)
        .unwrap()
        .into_router();
    let response = app.oneshot(get("/greeters/5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({ "id": 5, "content": "hello, ID is 5" }));
}

#[tokio::test]
async fn list_reports_full_count_with_one_page_of_items() {
    let response = users_router()
        .oneshot(get("/users?limit=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], json!(3));
    assert_eq!(body["limit"], json!(2));
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn list_applies_declared_filters() {
    let response = users_router()
        .oneshot(get("/users?username__like=%25c%25"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], json!(1));
    assert_eq!(body["items"][0]["username"], json!("crystal"));

    let response = users_router().oneshot(get("/users?age__gt=13")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], json!(2));
}

#[tokio::test]
async fn multiple_filters_combine_with_and() {
    let response = users_router()
        .oneshot(get("/users?username__like=%25c%25&age__gt=13"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], json!(1));
    assert_eq!(body["items"][0]["username"], json!("crystal"));
}

#[tokio::test]
async fn undeclared_query_params_do_not_filter() {
    let response = users_router()
        .oneshot(get("/users?color=red"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], json!(3));
}

#[tokio::test]
async fn create_returns_201_with_an_assigned_id() {
    let response = users_router()
        .oneshot(json_request(
            "POST",
            "/users",
            json!({ "username": "lumen", "age": 41 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["username"], json!("lumen"));
    assert_eq!(body["id"], json!(4));
}

#[tokio::test]
async fn update_merges_fields_into_the_record() {
    let response = users_router()
        .oneshot(json_request(
            "PATCH",
            "/users/1",
            json!({ "id": 1, "username": "eorl", "age": 14 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["age"], json!(14));
    assert_eq!(body["username"], json!("eorl"));
}

#[tokio::test]
async fn delete_removes_the_record_then_404s() {
    let router = users_router();
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/users/2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({ "result": true }));

    let response = router
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/users/2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], json!("NOT_FOUND"));
}

#[tokio::test]
async fn missing_record_is_a_404_with_the_structured_body() {
    let response = users_router().oneshot(get("/users/99")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], json!("NOT_FOUND"));
}

// ============================================================================
// CUSTOM ROUTES
// ============================================================================

#[tokio::test]
async fn custom_static_segment_is_not_captured_by_the_id_route() {
    let response = users_router().oneshot(get("/users/recents")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({ "data": ["rustam", "crystal"] }));
}

#[tokio::test]
async fn custom_get_destructures_input_from_the_query_string() {
    let response = users_router()
        .oneshot(get("/users/search?q=ry"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!(["crystal"]));
}

#[tokio::test]
async fn detail_custom_action_receives_the_path_id() {
    let response = users_router()
        .oneshot(json_request("POST", "/users/5/promote", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "id": 5, "promoted": true })
    );
}

// ============================================================================
// PERMISSIONS
// ============================================================================

struct DenyAll;

impl Permission for DenyAll {
    fn check(&self, _cx: &Context) -> bool {
        false
    }
}

struct Vault;

#[async_trait]
impl Resource for Vault {
    type Schema = Greeting;
    const NOUN: &'static str = "Vault";

    fn actions() -> ActionRegistry<Self> {
        ActionRegistry::builder().get().build()
    }

    fn permissions(&self) -> Vec<Arc<dyn Permission>> {
        vec![Arc::new(DenyAll)]
    }

    async fn get(&self, _cx: &Context, id: i64) -> ApiResult<Greeting> {
        Ok(Greeting {
            id,
            content: "secret".to_string(),
        })
    }
}

#[tokio::test]
async fn denied_calls_get_the_canonical_forbidden_body() {
    let app = App::new(AppConfig::default())
        .mount(Vault)
        .unwrap()
        .into_router();
    let response = app.oneshot(get("/vaults/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["code"], json!("FORBIDDEN"));
    assert_eq!(body["message"], json!("Permission Denied"));
}

// ============================================================================
// SESSION LIFECYCLE
// ============================================================================

struct CountingBackend(Arc<AtomicUsize>);

impl SessionBackend for CountingBackend {
    fn release(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct CountingFactory(Arc<AtomicUsize>);

#[async_trait]
impl SessionFactory for CountingFactory {
    async fn session(&self) -> ApiResult<Session> {
        Ok(Session::new(CountingBackend(self.0.clone())))
    }
}

struct Flaky;

#[async_trait]
impl Resource for Flaky {
    type Schema = Greeting;
    const NOUN: &'static str = "Flaky";

    fn actions() -> ActionRegistry<Self> {
        ActionRegistry::builder().get().build()
    }

    async fn get(&self, _cx: &Context, _id: i64) -> ApiResult<Greeting> {
        Err(atoll::ApiError::internal_error("boom"))
    }
}

#[tokio::test]
async fn session_releases_exactly_once_on_success() {
    let releases = Arc::new(AtomicUsize::new(0));
    let db = Db::new(CountingFactory(releases.clone()));
    let app = App::new(AppConfig::default())
        .with_db(db)
        .mount(Greeter)
        .unwrap()
        .into_router();
    let response = app.oneshot(get("/greeters/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_releases_exactly_once_when_the_action_fails() {
    let releases = Arc::new(AtomicUsize::new(0));
    let db = Db::new(CountingFactory(releases.clone()));
    let app = App::new(AppConfig::default())
        .with_db(db)
        .mount(Flaky)
        .unwrap()
        .into_router();
    let response = app.oneshot(get("/flakys/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}
