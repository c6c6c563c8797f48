//! The two transports must agree: the same declaration answers HTTP and
//! RPC calls with the same records, counts, and results.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceExt;

use atoll::dispatch::{rpc_create, rpc_custom, rpc_delete, rpc_get, rpc_list, rpc_update, ResourceHost};
use atoll::envelope::{DeleteRequest, GetRequest, ListRequest};
use atoll::{
    ActionRegistry, ApiResult, Context, CustomAction, Db, Handler, MemoryStore, Resource, Store,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Book {
    #[serde(default)]
    id: Option<i64>,
    title: String,
    pages: i64,
}

struct Books {
    store: MemoryStore,
}

impl Books {
    fn seeded(count: i64) -> Self {
        Self {
            store: MemoryStore::new(["id", "title", "pages"]).seed(
                (1..=count).map(|n| json!({ "title": format!("volume {}", n), "pages": n * 100 })),
            ),
        }
    }
}

#[async_trait]
impl Resource for Books {
    type Schema = Book;
    const NOUN: &'static str = "Book";
    const SERVICE: Option<&'static str> = Some("library.BookService");

    fn actions() -> ActionRegistry<Self> {
        ActionRegistry::builder().crud().build()
    }

    fn store(&self) -> Option<&dyn Store> {
        Some(&self.store)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Draft {
    #[serde(default)]
    id: Option<i64>,
    title: String,
}

struct Drafts {
    store: MemoryStore,
}

#[derive(Serialize, Deserialize)]
struct ComposeInput {
    title: String,
    author: String,
}

struct Compose;

#[async_trait]
impl Handler<Drafts> for Compose {
    type Input = ComposeInput;
    type Output = Value;

    async fn call(&self, resource: &Drafts, cx: &Context, input: ComposeInput) -> ApiResult<Value> {
        let mut fields = serde_json::Map::new();
        fields.insert(
            "title".to_string(),
            json!(format!("{} by {}", input.title, input.author)),
        );
        resource.store.create(&cx.session, fields).await
    }
}

#[derive(Serialize, Deserialize)]
struct PreviewInput {
    title: String,
    pages: i64,
}

struct Preview;

#[async_trait]
impl Handler<Drafts> for Preview {
    type Input = PreviewInput;
    type Output = Value;

    async fn call(&self, _resource: &Drafts, _cx: &Context, input: PreviewInput) -> ApiResult<Value> {
        Ok(json!({ "blurb": format!("{} ({} pages)", input.title, input.pages) }))
    }
}

#[async_trait]
impl Resource for Drafts {
    type Schema = Draft;
    const NOUN: &'static str = "Draft";

    fn actions() -> ActionRegistry<Self> {
        ActionRegistry::builder()
            .create_with(Compose)
            .custom(CustomAction::new("preview", Preview))
            .rpc_only()
            .build()
    }

    fn store(&self) -> Option<&dyn Store> {
        Some(&self.store)
    }
}

fn drafts() -> Drafts {
    Drafts {
        store: MemoryStore::new(["id", "title"]),
    }
}

fn drafts_host() -> ResourceHost<Drafts> {
    ResourceHost::new(drafts(), Db::detached()).unwrap()
}

fn host(count: i64) -> ResourceHost<Books> {
    ResourceHost::new(Books::seeded(count), Db::detached()).unwrap()
}

fn router(count: i64) -> axum::Router {
    atoll::router::generate(Books::seeded(count), Db::detached()).unwrap()
}

async fn http_json(router: axum::Router, method: &str, uri: &str) -> Value {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn get_returns_the_same_record_on_both_transports() {
    let over_http = http_json(router(3), "GET", "/2").await;
    let over_rpc = rpc_get(&host(3), GetRequest { id: 2 }).await.unwrap();
    assert_eq!(over_http, over_rpc.data);
}

#[tokio::test]
async fn list_pages_and_counts_agree_across_transports() {
    let over_http = http_json(router(15), "GET", "/?limit=4&offset=6").await;
    let over_rpc = rpc_list(
        &host(15),
        ListRequest {
            limit: 4,
            offset: 6,
            ..ListRequest::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(over_http["total"], json!(over_rpc.count));
    assert_eq!(over_http["items"], Value::Array(over_rpc.data));
}

#[tokio::test]
async fn zero_limit_falls_back_to_the_default_page_on_both_transports() {
    let over_http = http_json(router(15), "GET", "/").await;
    assert_eq!(over_http["items"].as_array().unwrap().len(), 10);
    assert_eq!(over_http["total"], json!(15));

    let over_rpc = rpc_list(&host(15), ListRequest::default()).await.unwrap();
    assert_eq!(over_rpc.data.len(), 10);
    assert_eq!(over_rpc.count, 15);
}

#[tokio::test]
async fn delete_reports_the_same_result_on_both_transports() {
    let over_http = http_json(router(3), "DELETE", "/2").await;
    let over_rpc = rpc_delete(&host(3), DeleteRequest { id: 2 }).await.unwrap();
    assert_eq!(over_http["result"], json!(over_rpc.result));

    let missing_http = http_json(router(3), "DELETE", "/9").await;
    let missing_rpc = rpc_delete(&host(3), DeleteRequest { id: 9 })
        .await
        .unwrap_err();
    assert_eq!(missing_http["code"], json!("NOT_FOUND"));
    assert_eq!(missing_rpc.code, atoll::ErrorCode::NotFound);
}

#[tokio::test]
async fn rpc_create_unwraps_the_nested_data_mapping() {
    let created = rpc_create(&host(3), json!({ "data": { "title": "volume 4", "pages": 400 } }))
        .await
        .unwrap();
    assert_eq!(created.data["id"], json!(4));
    assert_eq!(created.data["title"], json!("volume 4"));
}

#[tokio::test]
async fn rpc_update_takes_the_id_from_the_envelope() {
    let books = host(3);
    let updated = rpc_update(
        &books,
        json!({ "id": 2, "data": { "title": "revised", "pages": 999 } }),
    )
    .await
    .unwrap();
    assert_eq!(updated.data["id"], json!(2));
    assert_eq!(updated.data["pages"], json!(999));

    let fetched = rpc_get(&books, GetRequest { id: 2 }).await.unwrap();
    assert_eq!(fetched.data["title"], json!("revised"));
}

#[tokio::test]
async fn custom_schema_create_reads_the_whole_mapping() {
    let created = rpc_create(&drafts_host(), json!({ "title": "Dune", "author": "Frank" }))
        .await
        .unwrap();
    assert_eq!(created.data["title"], json!("Dune by Frank"));
    assert_eq!(created.data["id"], json!(1));
}

#[tokio::test]
async fn custom_rpc_method_reads_the_whole_mapping() {
    let out = rpc_custom(&drafts_host(), "preview", json!({ "title": "Dune", "pages": 412 }))
        .await
        .unwrap();
    assert_eq!(out, json!({ "blurb": "Dune (412 pages)" }));
}

#[tokio::test]
async fn rpc_only_actions_stay_off_the_http_router() {
    let router = atoll::router::generate(drafts(), Db::detached()).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/preview")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"title":"x","pages":1}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);

    let out = rpc_custom(&drafts_host(), "preview", json!({ "title": "x", "pages": 1 }))
        .await
        .unwrap();
    assert_eq!(out["blurb"], json!("x (1 pages)"));
}

mod windows {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn every_window_matches_across_transports(limit in 1u64..6, offset in 0u64..10) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let uri = format!("/?limit={}&offset={}", limit, offset);
                let over_http = http_json(router(8), "GET", &uri).await;
                let over_rpc = rpc_list(
                    &host(8),
                    ListRequest {
                        limit,
                        offset,
                        ..ListRequest::default()
                    },
                )
                .await
                .unwrap();
                prop_assert_eq!(over_http["total"].clone(), json!(over_rpc.count));
                prop_assert_eq!(over_http["items"].clone(), Value::Array(over_rpc.data));
                Ok(())
            })?;
        }
    }
}
