//! The resource abstraction: declare once, serve over HTTP and gRPC.
//!
//! A [`Resource`] names its noun, its schema, its actions and optionally a
//! model store. The five generic methods have store-backed default bodies;
//! a resource without a store overrides whichever methods it declares and
//! the rest answer `NotImplemented`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use atoll_core::envelope::ListRequest;
use atoll_core::filter::{parse_ordering, translate};

use crate::action::ActionRegistry;
use crate::context::Context;
use crate::error::{ApiError, ApiResult};
use crate::model::{Listing, Store};
use crate::permission::Permission;

/// Marker for types usable as a resource's record schema.
///
/// Blanket-implemented; any serde-round-trippable owned type qualifies.
pub trait Schema: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Schema for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Declared type of one filterable query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Int,
    Float,
    Bool,
    Text,
}

/// One filter parameter a resource accepts on its list endpoint.
///
/// The name carries the operator suffix (`age__gt`); the type drives
/// query-string conversion. Parameters that fail to convert are dropped
/// with a warning rather than failing the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDef {
    pub name: &'static str,
    pub ty: FilterType,
}

impl FilterDef {
    pub fn new(name: &'static str, ty: FilterType) -> Self {
        Self { name, ty }
    }

    /// Convert a raw query-string value to the declared type.
    pub fn convert(&self, raw: &str) -> Option<Value> {
        match self.ty {
            FilterType::Int => raw.parse::<i64>().ok().map(Value::from),
            FilterType::Float => raw.parse::<f64>().ok().map(Value::from),
            FilterType::Bool => match raw {
                "true" | "True" | "1" => Some(Value::Bool(true)),
                "false" | "False" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            FilterType::Text => Some(Value::String(raw.to_string())),
        }
    }
}

/// A resource declared once and exposed over both transports.
///
/// `NOUN` is the singular CamelCase name everything else derives from:
/// the HTTP mount path and the gRPC method names. `SERVICE` opts the
/// resource into gRPC with a fully-qualified service name; left `None`,
/// the resource is HTTP-only and asking for a servicer fails.
#[async_trait]
pub trait Resource: Send + Sync + Sized + 'static {
    /// Record schema crossing the wire for this resource.
    type Schema: Schema;

    /// Singular CamelCase noun, e.g. `"UserAddress"`.
    const NOUN: &'static str;

    /// Fully-qualified gRPC service name, e.g. `"shop.ItemService"`.
    const SERVICE: Option<&'static str> = None;

    /// Declare the action set.
    fn actions() -> ActionRegistry<Self>;

    /// Filter parameters accepted on the list endpoint.
    fn filters(&self) -> Vec<FilterDef> {
        Vec::new()
    }

    /// Permission gates run before every action, on both transports.
    fn permissions(&self) -> Vec<Arc<dyn Permission>> {
        Vec::new()
    }

    /// Model store backing the generic actions, if any.
    fn store(&self) -> Option<&dyn Store> {
        None
    }

    /// List records matching the request's filters and ordering.
    async fn list(&self, cx: &Context, req: ListRequest) -> ApiResult<Listing<Self::Schema>> {
        let store = require_store(self, "list")?;
        let filters = translate(store.columns(), &req.filters)?;
        let ordering = req.ordering.iter().map(|expr| parse_ordering(expr)).collect();
        let query = store.query(&cx.session, filters, ordering).await?;
        Ok(Listing::Query(query))
    }

    /// Fetch one record by primary key.
    async fn get(&self, cx: &Context, id: i64) -> ApiResult<Self::Schema> {
        let store = require_store(self, "get")?;
        let row = store
            .first(&cx.session, id)
            .await?
            .ok_or_else(|| ApiError::record_not_found(Self::NOUN, id))?;
        Ok(serde_json::from_value(row)?)
    }

    /// Create a record from its schema.
    async fn create(&self, cx: &Context, data: Self::Schema) -> ApiResult<Self::Schema> {
        let store = require_store(self, "create")?;
        let row = store.create(&cx.session, to_fields(&data)?).await?;
        Ok(serde_json::from_value(row)?)
    }

    /// Merge schema fields into an existing record.
    async fn update(&self, cx: &Context, id: i64, data: Self::Schema) -> ApiResult<Self::Schema> {
        let store = require_store(self, "update")?;
        let row = store.update(&cx.session, id, to_fields(&data)?).await?;
        Ok(serde_json::from_value(row)?)
    }

    /// Delete a record by primary key.
    async fn delete(&self, cx: &Context, id: i64) -> ApiResult<bool> {
        let store = require_store(self, "delete")?;
        if store.delete(&cx.session, id).await? {
            Ok(true)
        } else {
            Err(ApiError::record_not_found(Self::NOUN, id))
        }
    }
}

fn require_store<'a, R: Resource>(resource: &'a R, action: &str) -> ApiResult<&'a dyn Store> {
    resource
        .store()
        .ok_or_else(|| ApiError::not_implemented(R::NOUN, action))
}

fn to_fields<T: Serialize>(data: &T) -> ApiResult<Map<String, Value>> {
    match serde_json::to_value(data)? {
        Value::Object(map) => Ok(map),
        other => Err(ApiError::internal_error(format!(
            "schema serialized to a non-object value: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionRegistry;
    use crate::context::Transport;
    use crate::model::{MemoryStore, Session};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct User {
        #[serde(default)]
        id: Option<i64>,
        username: String,
        age: i64,
    }

    struct UserResource {
        store: MemoryStore,
    }

    impl UserResource {
        fn seeded() -> Self {
            Self {
                store: MemoryStore::new(["id", "username", "age"]).seed([
                    json!({ "username": "eorl", "age": 13 }),
                    json!({ "username": "crystal", "age": 20 }),
                ]),
            }
        }
    }

    #[async_trait]
    impl Resource for UserResource {
        type Schema = User;

        const NOUN: &'static str = "User";

        fn actions() -> ActionRegistry<Self> {
            ActionRegistry::builder().crud().build()
        }

        fn store(&self) -> Option<&dyn Store> {
            Some(&self.store)
        }
    }

    fn cx() -> Context {
        Context::new(Transport::Http, Session::null())
    }

    #[tokio::test]
    async fn default_get_reads_through_the_store() {
        let resource = UserResource::seeded();
        let user = resource.get(&cx(), 2).await.unwrap();
        assert_eq!(user.username, "crystal");

        let err = resource.get(&cx(), 99).await.unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn default_create_assigns_id() {
        let resource = UserResource::seeded();
        let created = resource
            .create(
                &cx(),
                User {
                    id: None,
                    username: "newt".to_string(),
                    age: 7,
                },
            )
            .await
            .unwrap();
        assert_eq!(created.id, Some(3));
    }

    #[tokio::test]
    async fn default_delete_reports_missing_record() {
        let resource = UserResource::seeded();
        assert!(resource.delete(&cx(), 1).await.unwrap());
        let err = resource.delete(&cx(), 1).await.unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::NotFound);
    }

    struct Bare;

    #[async_trait]
    impl Resource for Bare {
        type Schema = Value;

        const NOUN: &'static str = "Bare";

        fn actions() -> ActionRegistry<Self> {
            ActionRegistry::builder().get().build()
        }
    }

    #[tokio::test]
    async fn storeless_defaults_answer_not_implemented() {
        let err = Bare.get(&cx(), 1).await.unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::NotImplemented);
    }

    #[test]
    fn filter_conversion_per_declared_type() {
        assert_eq!(
            FilterDef::new("age__gt", FilterType::Int).convert("18"),
            Some(json!(18))
        );
        assert_eq!(FilterDef::new("age__gt", FilterType::Int).convert("x"), None);
        assert_eq!(
            FilterDef::new("active", FilterType::Bool).convert("true"),
            Some(json!(true))
        );
        assert_eq!(
            FilterDef::new("username__like", FilterType::Text).convert("%c%"),
            Some(json!("%c%"))
        );
    }
}
