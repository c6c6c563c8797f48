//! Dual-protocol dispatch.
//!
//! A [`ResourceHost`] owns one wired resource: the instance, its validated
//! action registry, its permission gates and the database handle. Both
//! generators drive the same host, so the two transports cannot drift.
//!
//! Every dispatched call follows the same sequence: open a session, build
//! the [`Context`] with the explicit transport flag, run the permission
//! gates, invoke the action, release the session, then shape the response
//! for the wire. The session release sits between invoke and respond on
//! success *and* failure.

use std::sync::Arc;

use serde_json::{Map, Value};

use atoll_core::envelope::{
    CreateRequest, DeleteRequest, GetRequest, ItemResponse, ListRequest, ListResponse,
    ResultResponse, UpdateRequest,
};
use atoll_core::paginate::effective_limit;
use atoll_core::DefinitionError;

use crate::action::{ActionDef, ActionKind, ActionRegistry};
use crate::context::{Context, Transport};
use crate::error::{ApiError, ApiResult};
use crate::model::{paginate_listing, Db};
use crate::permission::{check_permissions, Permission};
use crate::resource::{FilterDef, Resource};

/// One resource wired for dispatch.
pub struct ResourceHost<R: Resource> {
    resource: Arc<R>,
    registry: Arc<ActionRegistry<R>>,
    permissions: Arc<[Arc<dyn Permission>]>,
    filters: Arc<[FilterDef]>,
    db: Db,
}

impl<R: Resource> Clone for ResourceHost<R> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            registry: self.registry.clone(),
            permissions: self.permissions.clone(),
            filters: self.filters.clone(),
            db: self.db.clone(),
        }
    }
}

impl<R: Resource> ResourceHost<R> {
    /// Wire a resource instance, validating its declaration.
    pub fn new(resource: R, db: Db) -> Result<Self, DefinitionError> {
        let registry = R::actions();
        registry.validate(R::NOUN, resource.store().is_some())?;
        let permissions: Arc<[Arc<dyn Permission>]> = resource.permissions().into();
        let filters: Arc<[FilterDef]> = resource.filters().into();
        Ok(Self {
            resource: Arc::new(resource),
            registry: Arc::new(registry),
            permissions,
            filters,
            db,
        })
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    pub fn registry(&self) -> &ActionRegistry<R> {
        &self.registry
    }

    pub(crate) fn filters(&self) -> &[FilterDef] {
        &self.filters
    }

    /// Open a session and build the per-call context.
    pub(crate) async fn begin(&self, transport: Transport) -> ApiResult<Context> {
        let session = self.db.session().await?;
        Ok(Context::new(transport, session))
    }

    pub(crate) fn check(&self, cx: &Context) -> ApiResult<()> {
        check_permissions(&self.permissions, cx)
    }
}

// ============================================================================
// RPC DISPATCH
// ============================================================================

/// Dispatch a gRPC `Get{Noun}` call.
pub async fn rpc_get<R: Resource>(
    host: &ResourceHost<R>,
    req: GetRequest,
) -> ApiResult<ItemResponse> {
    let cx = host.begin(Transport::Rpc).await?;
    let result = async {
        host.check(&cx)?;
        let record = host.resource.get(&cx, req.id).await?;
        Ok(ItemResponse {
            data: serde_json::to_value(record)?,
        })
    }
    .await;
    cx.session.release();
    result
}

/// Dispatch a gRPC `List{Nouns}` call: list, then paginate, then rename
/// the page fields into the proto envelope (`total` becomes `count`,
/// `items` becomes `data`).
pub async fn rpc_list<R: Resource>(
    host: &ResourceHost<R>,
    req: ListRequest,
) -> ApiResult<ListResponse> {
    let limit = effective_limit(req.limit);
    let offset = req.offset;
    let cx = host.begin(Transport::Rpc).await?;
    let result = async {
        host.check(&cx)?;
        let listing = host.resource.list(&cx, req).await?.into_values()?;
        let page = paginate_listing(listing, limit, offset).await?;
        Ok(ListResponse {
            data: page.items,
            count: page.total,
        })
    }
    .await;
    cx.session.release();
    result
}

/// Dispatch a gRPC `Create{Noun}` call.
///
/// The payload is the flattened request message. With the generic
/// envelope the nested `data` mapping is unwrapped into the resource
/// schema; a custom-schema action instead constructs its input from the
/// whole mapping, no unwrapping.
pub async fn rpc_create<R: Resource>(
    host: &ResourceHost<R>,
    payload: Value,
) -> ApiResult<ItemResponse> {
    let entry = generic_entry(host, ActionKind::Create, "create")?;
    let cx = host.begin(Transport::Rpc).await?;
    let result = async {
        host.check(&cx)?;
        let data = match &entry.handler {
            Some(handler) => handler.call_value(&host.resource, &cx, payload).await?,
            None => {
                let req: CreateRequest = serde_json::from_value(payload)?;
                let schema: R::Schema = serde_json::from_value(Value::Object(req.data))
                    .map_err(ApiError::from)?;
                let record = host.resource.create(&cx, schema).await?;
                serde_json::to_value(record)?
            }
        };
        Ok(ItemResponse { data })
    }
    .await;
    cx.session.release();
    result
}

/// Dispatch a gRPC `Update{Noun}` call. Same unwrapping rule as create,
/// with the primary key taken from the envelope.
pub async fn rpc_update<R: Resource>(
    host: &ResourceHost<R>,
    payload: Value,
) -> ApiResult<ItemResponse> {
    let entry = generic_entry(host, ActionKind::Update, "update")?;
    let cx = host.begin(Transport::Rpc).await?;
    let result = async {
        host.check(&cx)?;
        let data = match &entry.handler {
            Some(handler) => handler.call_value(&host.resource, &cx, payload).await?,
            None => {
                let req: UpdateRequest = serde_json::from_value(payload)?;
                let schema: R::Schema = serde_json::from_value(Value::Object(req.data))
                    .map_err(ApiError::from)?;
                let record = host.resource.update(&cx, req.id, schema).await?;
                serde_json::to_value(record)?
            }
        };
        Ok(ItemResponse { data })
    }
    .await;
    cx.session.release();
    result
}

/// Dispatch a gRPC `Delete{Noun}` call.
pub async fn rpc_delete<R: Resource>(
    host: &ResourceHost<R>,
    req: DeleteRequest,
) -> ApiResult<ResultResponse> {
    let cx = host.begin(Transport::Rpc).await?;
    let result = async {
        host.check(&cx)?;
        let result = host.resource.delete(&cx, req.id).await?;
        Ok(ResultResponse { result })
    }
    .await;
    cx.session.release();
    result
}

/// Dispatch a custom gRPC method. The handler's input schema constructs
/// from the whole flattened message; the raw output mapping passes
/// through.
pub async fn rpc_custom<R: Resource>(
    host: &ResourceHost<R>,
    name: &str,
    payload: Value,
) -> ApiResult<Value> {
    let entry = host
        .registry()
        .get(name)
        .filter(|entry| entry.kind == ActionKind::Custom)
        .ok_or_else(|| ApiError::not_implemented(R::NOUN, name))?;
    let handler = entry
        .handler
        .clone()
        .ok_or_else(|| ApiError::not_implemented(R::NOUN, name))?;
    let cx = host.begin(Transport::Rpc).await?;
    let result = async {
        host.check(&cx)?;
        handler.call_value(&host.resource, &cx, payload).await
    }
    .await;
    cx.session.release();
    result
}

fn generic_entry<'a, R: Resource>(
    host: &'a ResourceHost<R>,
    kind: ActionKind,
    name: &str,
) -> ApiResult<&'a ActionDef<R>> {
    host.registry()
        .get(name)
        .filter(|entry| entry.kind == kind)
        .ok_or_else(|| ApiError::not_implemented(R::NOUN, name))
}

/// Assemble a `ListRequest` from loose HTTP query parts; shared by the
/// router so filter leniency lives in one place.
pub(crate) fn list_request_from_query(
    filters: &[FilterDef],
    pairs: &[(String, String)],
) -> ListRequest {
    let mut filter_map = Map::new();
    for def in filters {
        for (key, raw) in pairs {
            if key == def.name {
                match def.convert(raw) {
                    Some(value) => {
                        filter_map.insert(def.name.to_string(), value);
                    }
                    None => {
                        tracing::warn!(
                            filter = def.name,
                            value = %raw,
                            "dropping filter parameter that failed conversion"
                        );
                    }
                }
            }
        }
    }

    let mut req = ListRequest {
        filters: filter_map,
        ..ListRequest::default()
    };
    for (key, raw) in pairs {
        match key.as_str() {
            "limit" => {
                if let Ok(limit) = raw.parse() {
                    req.limit = limit;
                }
            }
            "offset" => {
                if let Ok(offset) = raw.parse() {
                    req.offset = offset;
                }
            }
            "ordering" => req.ordering.push(raw.clone()),
            _ => {}
        }
    }
    req
}
