//! HTTP router generation.
//!
//! One call turns a wired resource into an `axum::Router` following the
//! generic conventions: `GET /` lists, `POST /` creates (201), `GET`,
//! `PATCH` and `DELETE /{id}` address one record. Custom actions register
//! before the generic routes so a static segment like `/recents` is never
//! captured by the generic `/{id}`.
//!
//! Custom actions whose method list includes `GET` destructure their input
//! schema from the query string; all others read a JSON body.

use axum::{
    extract::{Path, RawQuery},
    http::StatusCode,
    routing::{on, MethodFilter},
    Json, Router,
};
use serde_json::{Map, Value};

use atoll_core::naming::path_segment;
use atoll_core::paginate::{effective_limit, Page};
use atoll_core::{DefinitionError, ResultResponse};

use crate::action::{ActionDef, ActionKind, Method};
use crate::context::Transport;
use crate::dispatch::{list_request_from_query, ResourceHost};
use crate::error::{ApiError, ApiResult};
use crate::model::{paginate_listing, Db};
use crate::resource::Resource;

/// Generate the HTTP router for a resource.
pub fn generate<R: Resource>(resource: R, db: Db) -> Result<Router, DefinitionError> {
    let host = ResourceHost::new(resource, db)?;
    Ok(router_for(host))
}

/// Build the router from an already-wired host.
pub(crate) fn router_for<R: Resource>(host: ResourceHost<R>) -> Router {
    let mut router = Router::new();
    let entries: Vec<ActionDef<R>> = host.registry().entries().to_vec();
    for entry in entries {
        if entry.rpc_only {
            continue;
        }
        router = match entry.kind {
            ActionKind::List => {
                let h = host.clone();
                router.route(
                    "/",
                    axum::routing::get(move |RawQuery(query): RawQuery| {
                        let h = h.clone();
                        async move { list_handler(h, query.unwrap_or_default()).await }
                    }),
                )
            }
            ActionKind::Get => {
                let h = host.clone();
                router.route(
                    "/:id",
                    axum::routing::get(move |Path(id): Path<i64>| {
                        let h = h.clone();
                        async move { get_handler(h, id).await }
                    }),
                )
            }
            ActionKind::Create => {
                let h = host.clone();
                router.route(
                    "/",
                    axum::routing::post(move |Json(body): Json<Value>| {
                        let h = h.clone();
                        async move { create_handler(h, body).await }
                    }),
                )
            }
            ActionKind::Update => {
                let h = host.clone();
                router.route(
                    "/:id",
                    axum::routing::patch(move |Path(id): Path<i64>, Json(body): Json<Value>| {
                        let h = h.clone();
                        async move { update_handler(h, id, body).await }
                    }),
                )
            }
            ActionKind::Delete => {
                let h = host.clone();
                router.route(
                    "/:id",
                    axum::routing::delete(move |Path(id): Path<i64>| {
                        let h = h.clone();
                        async move { delete_handler(h, id).await }
                    }),
                )
            }
            ActionKind::Custom => custom_route(router, &host, &entry),
        };
    }
    router
}

fn method_filter(method: Method) -> MethodFilter {
    match method {
        Method::Get => MethodFilter::GET,
        Method::Post => MethodFilter::POST,
        Method::Put => MethodFilter::PUT,
        Method::Patch => MethodFilter::PATCH,
        Method::Delete => MethodFilter::DELETE,
    }
}

fn custom_route<R: Resource>(
    router: Router,
    host: &ResourceHost<R>,
    entry: &ActionDef<R>,
) -> Router {
    let path = if entry.detail {
        format!("/:id/{}", path_segment(entry.name))
    } else {
        format!("/{}", path_segment(entry.name))
    };
    let filter = entry
        .methods
        .iter()
        .copied()
        .map(method_filter)
        .reduce(MethodFilter::or)
        .unwrap_or(MethodFilter::POST);
    let from_query = entry.methods.contains(&Method::Get);
    let name = entry.name;

    match (entry.detail, from_query) {
        (true, true) => {
            let h = host.clone();
            router.route(
                &path,
                on(filter, move |Path(id): Path<i64>, RawQuery(query): RawQuery| {
                    let h = h.clone();
                    async move {
                        custom_query_handler(h, name, Some(id), query.unwrap_or_default()).await
                    }
                }),
            )
        }
        (true, false) => {
            let h = host.clone();
            router.route(
                &path,
                on(filter, move |Path(id): Path<i64>, Json(body): Json<Value>| {
                    let h = h.clone();
                    async move { custom_body_handler(h, name, Some(id), body).await }
                }),
            )
        }
        (false, true) => {
            let h = host.clone();
            router.route(
                &path,
                on(filter, move |RawQuery(query): RawQuery| {
                    let h = h.clone();
                    async move {
                        custom_query_handler(h, name, None, query.unwrap_or_default()).await
                    }
                }),
            )
        }
        (false, false) => {
            let h = host.clone();
            router.route(
                &path,
                on(filter, move |Json(body): Json<Value>| {
                    let h = h.clone();
                    async move { custom_body_handler(h, name, None, body).await }
                }),
            )
        }
    }
}

// ============================================================================
// GENERIC HANDLERS
// ============================================================================

async fn list_handler<R: Resource>(
    host: ResourceHost<R>,
    raw_query: String,
) -> ApiResult<Json<Page<Value>>> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(&raw_query)
        .map_err(|e| ApiError::invalid_input(format!("Invalid query string: {}", e)))?;
    let req = list_request_from_query(host.filters(), &pairs);
    let limit = effective_limit(req.limit);
    let offset = req.offset;

    let cx = host.begin(Transport::Http).await?;
    let result = async {
        host.check(&cx)?;
        let listing = host.resource().list(&cx, req).await?.into_values()?;
        paginate_listing(listing, limit, offset).await
    }
    .await;
    cx.session.release();
    result.map(Json)
}

async fn get_handler<R: Resource>(host: ResourceHost<R>, id: i64) -> ApiResult<Json<Value>> {
    let cx = host.begin(Transport::Http).await?;
    let result = async {
        host.check(&cx)?;
        let record = host.resource().get(&cx, id).await?;
        Ok(serde_json::to_value(record)?)
    }
    .await;
    cx.session.release();
    result.map(Json)
}

async fn create_handler<R: Resource>(
    host: ResourceHost<R>,
    body: Value,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let entry = host
        .registry()
        .get("create")
        .cloned()
        .ok_or_else(|| ApiError::not_implemented(R::NOUN, "create"))?;
    let cx = host.begin(Transport::Http).await?;
    let result = async {
        host.check(&cx)?;
        match &entry.handler {
            Some(handler) => handler.call_value(host.resource(), &cx, body).await,
            None => {
                let schema: R::Schema = serde_json::from_value(body)?;
                let record = host.resource().create(&cx, schema).await?;
                Ok(serde_json::to_value(record)?)
            }
        }
    }
    .await;
    cx.session.release();
    result.map(|value| (StatusCode::CREATED, Json(value)))
}

async fn update_handler<R: Resource>(
    host: ResourceHost<R>,
    id: i64,
    body: Value,
) -> ApiResult<Json<Value>> {
    let entry = host
        .registry()
        .get("update")
        .cloned()
        .ok_or_else(|| ApiError::not_implemented(R::NOUN, "update"))?;
    let cx = host.begin(Transport::Http).await?;
    let result = async {
        host.check(&cx)?;
        match &entry.handler {
            Some(handler) => {
                let input = merge_id(body, id);
                handler.call_value(host.resource(), &cx, input).await
            }
            None => {
                let schema: R::Schema = serde_json::from_value(body)?;
                let record = host.resource().update(&cx, id, schema).await?;
                Ok(serde_json::to_value(record)?)
            }
        }
    }
    .await;
    cx.session.release();
    result.map(Json)
}

async fn delete_handler<R: Resource>(
    host: ResourceHost<R>,
    id: i64,
) -> ApiResult<Json<ResultResponse>> {
    let cx = host.begin(Transport::Http).await?;
    let result = async {
        host.check(&cx)?;
        let result = host.resource().delete(&cx, id).await?;
        Ok(ResultResponse { result })
    }
    .await;
    cx.session.release();
    result.map(Json)
}

// ============================================================================
// CUSTOM HANDLERS
// ============================================================================

async fn custom_query_handler<R: Resource>(
    host: ResourceHost<R>,
    name: &'static str,
    id: Option<i64>,
    raw_query: String,
) -> ApiResult<Json<Value>> {
    let handler = custom_handler_for(&host, name)?;
    let input = merge_optional_id(handler.input_from_query(&raw_query)?, id);
    run_custom(host, handler, input).await
}

async fn custom_body_handler<R: Resource>(
    host: ResourceHost<R>,
    name: &'static str,
    id: Option<i64>,
    body: Value,
) -> ApiResult<Json<Value>> {
    let handler = custom_handler_for(&host, name)?;
    let input = merge_optional_id(body, id);
    run_custom(host, handler, input).await
}

fn custom_handler_for<R: Resource>(
    host: &ResourceHost<R>,
    name: &str,
) -> ApiResult<std::sync::Arc<dyn crate::action::ErasedHandler<R>>> {
    host.registry()
        .get(name)
        .and_then(|entry| entry.handler.clone())
        .ok_or_else(|| ApiError::not_implemented(R::NOUN, name))
}

async fn run_custom<R: Resource>(
    host: ResourceHost<R>,
    handler: std::sync::Arc<dyn crate::action::ErasedHandler<R>>,
    input: Value,
) -> ApiResult<Json<Value>> {
    let cx = host.begin(Transport::Http).await?;
    let result = async {
        host.check(&cx)?;
        handler.call_value(host.resource(), &cx, input).await
    }
    .await;
    cx.session.release();
    result.map(Json)
}

fn merge_id(body: Value, id: i64) -> Value {
    merge_optional_id(body, Some(id))
}

/// Inject the path id into the input mapping for detail actions.
fn merge_optional_id(input: Value, id: Option<i64>) -> Value {
    let Some(id) = id else {
        return input;
    };
    let mut map = match input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    map.insert("id".to_string(), Value::from(id));
    Value::Object(map)
}
