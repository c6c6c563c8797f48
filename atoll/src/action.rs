//! Action declarations and the per-resource registry.
//!
//! Every operation a resource exposes is an [`ActionDef`]: a name, an
//! [`ActionKind`] the dispatcher switches on, and for custom actions a
//! type-erased handler. The registry is built explicitly by the resource
//! author; nothing is discovered by inspection, so what dispatches is
//! exactly what was declared.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use atoll_core::DefinitionError;

use crate::context::Context;
use crate::error::{ApiError, ApiResult};

/// What the dispatcher does with an action.
///
/// The five generic kinds route and re-shape by convention; `Custom`
/// invokes the registered handler with its own input schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    List,
    Get,
    Create,
    Update,
    Delete,
    Custom,
}

impl ActionKind {
    /// Canonical action name used by the naming strategy.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::List => "list",
            ActionKind::Get => "get",
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::Custom => "custom",
        }
    }
}

/// HTTP verbs a custom action can mount under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// A typed handler for one custom action.
///
/// The input schema deserializes from a JSON body, an urlencoded query
/// string, or a flattened proto message, whichever the transport
/// delivers. The output serializes back into whatever envelope the
/// transport wants.
#[async_trait]
pub trait Handler<R>: Send + Sync + 'static
where
    R: Send + Sync + 'static,
{
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send + 'static;

    async fn call(&self, resource: &R, cx: &Context, input: Self::Input) -> ApiResult<Self::Output>;
}

/// Object-safe face of [`Handler`] used by the dispatcher and the
/// generators.
#[async_trait]
pub trait ErasedHandler<R>: Send + Sync
where
    R: Send + Sync + 'static,
{
    /// Deserialize the input schema from a JSON value, run the handler,
    /// serialize the output.
    async fn call_value(&self, resource: &R, cx: &Context, input: Value) -> ApiResult<Value>;

    /// Destructure the input schema from a raw urlencoded query string.
    fn input_from_query(&self, raw_query: &str) -> ApiResult<Value>;
}

struct Erased<H>(H);

#[async_trait]
impl<R, H> ErasedHandler<R> for Erased<H>
where
    R: Send + Sync + 'static,
    H: Handler<R>,
    H::Input: Serialize,
{
    async fn call_value(&self, resource: &R, cx: &Context, input: Value) -> ApiResult<Value> {
        let input: H::Input = serde_json::from_value(input)
            .map_err(|e| ApiError::invalid_input(format!("Invalid action input: {}", e)))?;
        let output = self.0.call(resource, cx, input).await?;
        Ok(serde_json::to_value(output)?)
    }

    fn input_from_query(&self, raw_query: &str) -> ApiResult<Value> {
        let input: H::Input = serde_urlencoded::from_str(raw_query)
            .map_err(|e| ApiError::invalid_input(format!("Invalid query string: {}", e)))?;
        Ok(serde_json::to_value(input)?)
    }
}

/// One declared action.
pub struct ActionDef<R>
where
    R: Send + Sync + 'static,
{
    pub name: &'static str,
    pub kind: ActionKind,
    /// Detail actions address one record and mount under `/{id}/...`.
    pub detail: bool,
    /// HTTP verbs; only meaningful for custom actions.
    pub methods: Vec<Method>,
    /// Custom input schema. Always present for `Custom`; optionally
    /// present on `Create`/`Update` to replace the generic envelope.
    pub handler: Option<Arc<dyn ErasedHandler<R>>>,
    /// Excluded from HTTP routing; still bound as an RPC method.
    pub rpc_only: bool,
    /// Whether dispatch goes through the model store.
    pub(crate) model_backed: bool,
}

impl<R> Clone for ActionDef<R>
where
    R: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            kind: self.kind,
            detail: self.detail,
            methods: self.methods.clone(),
            handler: self.handler.clone(),
            rpc_only: self.rpc_only,
            model_backed: self.model_backed,
        }
    }
}

/// Declaration of one custom action, built fluently and handed to the
/// registry builder.
pub struct CustomAction<R>
where
    R: Send + Sync + 'static,
{
    name: &'static str,
    detail: bool,
    methods: Vec<Method>,
    handler: Arc<dyn ErasedHandler<R>>,
}

impl<R> CustomAction<R>
where
    R: Send + Sync + 'static,
{
    pub fn new<H>(name: &'static str, handler: H) -> Self
    where
        H: Handler<R>,
        H::Input: Serialize,
    {
        Self {
            name,
            detail: false,
            methods: vec![Method::Post],
            handler: Arc::new(Erased(handler)),
        }
    }

    /// Address one record: the route takes `/{id}/...` and the input
    /// schema receives the id.
    pub fn detail(mut self) -> Self {
        self.detail = true;
        self
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }
}

/// Ordered set of a resource's actions.
///
/// Custom actions always come before generic ones, so their routes
/// register first and a custom path can never be shadowed by the generic
/// `/{id}` capture.
pub struct ActionRegistry<R>
where
    R: Send + Sync + 'static,
{
    entries: Vec<ActionDef<R>>,
}

impl<R> ActionRegistry<R>
where
    R: Send + Sync + 'static,
{
    pub fn builder() -> ActionRegistryBuilder<R> {
        ActionRegistryBuilder {
            entries: Vec::new(),
        }
    }

    /// Actions in registration order, custom before generic.
    pub fn entries(&self) -> &[ActionDef<R>] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&ActionDef<R>> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Check declaration invariants against the owning resource.
    pub(crate) fn validate(&self, noun: &str, has_store: bool) -> Result<(), DefinitionError> {
        for (i, entry) in self.entries.iter().enumerate() {
            if self.entries[..i].iter().any(|e| e.name == entry.name) {
                return Err(DefinitionError::DuplicateAction {
                    resource: noun.to_string(),
                    name: entry.name.to_string(),
                });
            }
            if entry.model_backed && !has_store {
                return Err(DefinitionError::MissingStore {
                    resource: noun.to_string(),
                    name: entry.name.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Explicit builder for a resource's action set.
pub struct ActionRegistryBuilder<R>
where
    R: Send + Sync + 'static,
{
    entries: Vec<ActionDef<R>>,
}

impl<R> ActionRegistryBuilder<R>
where
    R: Send + Sync + 'static,
{
    fn push_generic(mut self, name: &'static str, kind: ActionKind, detail: bool, model: bool) -> Self {
        self.entries.push(ActionDef {
            name,
            kind,
            detail,
            methods: Vec::new(),
            handler: None,
            rpc_only: false,
            model_backed: model,
        });
        self
    }

    /// Mark the action declared immediately before this call as
    /// RPC-only: its gRPC method is still bound but no HTTP route is
    /// generated for it.
    pub fn rpc_only(mut self) -> Self {
        if let Some(entry) = self.entries.last_mut() {
            entry.rpc_only = true;
        }
        self
    }

    /// Declare a generic action served by the resource's own method
    /// implementation.
    pub fn list(self) -> Self {
        self.push_generic("list", ActionKind::List, false, false)
    }

    pub fn get(self) -> Self {
        self.push_generic("get", ActionKind::Get, true, false)
    }

    pub fn create(self) -> Self {
        self.push_generic("create", ActionKind::Create, false, false)
    }

    pub fn update(self) -> Self {
        self.push_generic("update", ActionKind::Update, true, false)
    }

    pub fn delete(self) -> Self {
        self.push_generic("delete", ActionKind::Delete, true, false)
    }

    /// Declare all five generic actions backed by the model store.
    /// Validation fails if the resource never provides one.
    pub fn crud(self) -> Self {
        self.push_generic("list", ActionKind::List, false, true)
            .push_generic("get", ActionKind::Get, true, true)
            .push_generic("create", ActionKind::Create, false, true)
            .push_generic("update", ActionKind::Update, true, true)
            .push_generic("delete", ActionKind::Delete, true, true)
    }

    /// Replace the generic create envelope with a custom input schema.
    pub fn create_with<H>(mut self, handler: H) -> Self
    where
        H: Handler<R>,
        H::Input: Serialize,
    {
        self.entries.push(ActionDef {
            name: "create",
            kind: ActionKind::Create,
            detail: false,
            methods: Vec::new(),
            handler: Some(Arc::new(Erased(handler))),
            rpc_only: false,
            model_backed: false,
        });
        self
    }

    /// Replace the generic update envelope with a custom input schema.
    pub fn update_with<H>(mut self, handler: H) -> Self
    where
        H: Handler<R>,
        H::Input: Serialize,
    {
        self.entries.push(ActionDef {
            name: "update",
            kind: ActionKind::Update,
            detail: true,
            methods: Vec::new(),
            handler: Some(Arc::new(Erased(handler))),
            rpc_only: false,
            model_backed: false,
        });
        self
    }

    /// Register a custom action.
    pub fn custom(mut self, action: CustomAction<R>) -> Self {
        self.entries.push(ActionDef {
            name: action.name,
            kind: ActionKind::Custom,
            detail: action.detail,
            methods: action.methods,
            handler: Some(action.handler),
            rpc_only: false,
            model_backed: false,
        });
        self
    }

    /// Finish the registry. Custom actions are moved ahead of generic
    /// ones, preserving relative order within each group.
    pub fn build(self) -> ActionRegistry<R> {
        let (custom, generic): (Vec<_>, Vec<_>) = self
            .entries
            .into_iter()
            .partition(|entry| entry.kind == ActionKind::Custom);
        let mut entries = custom;
        entries.extend(generic);
        ActionRegistry { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    struct Probe;

    #[derive(Deserialize, Serialize)]
    struct EchoInput {
        text: String,
    }

    struct Echo;

    #[async_trait]
    impl Handler<Probe> for Echo {
        type Input = EchoInput;
        type Output = EchoInput;

        async fn call(
            &self,
            _resource: &Probe,
            _cx: &Context,
            input: Self::Input,
        ) -> ApiResult<Self::Output> {
            Ok(input)
        }
    }

    #[test]
    fn custom_actions_sort_before_generic() {
        let registry = ActionRegistry::<Probe>::builder()
            .crud()
            .custom(CustomAction::new("recents", Echo).methods([Method::Get]))
            .build();
        let names: Vec<_> = registry.entries().iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["recents", "list", "get", "create", "update", "delete"]);
    }

    #[test]
    fn rpc_only_marks_the_preceding_entry() {
        let registry = ActionRegistry::<Probe>::builder()
            .crud()
            .custom(CustomAction::new("recents", Echo))
            .rpc_only()
            .build();
        assert!(registry.get("recents").unwrap().rpc_only);
        assert!(!registry.get("list").unwrap().rpc_only);
    }

    #[test]
    fn duplicate_actions_fail_validation() {
        let registry = ActionRegistry::<Probe>::builder().get().get().build();
        assert!(matches!(
            registry.validate("Probe", true),
            Err(DefinitionError::DuplicateAction { .. })
        ));
    }

    #[test]
    fn model_backed_actions_require_a_store() {
        let registry = ActionRegistry::<Probe>::builder().crud().build();
        assert!(registry.validate("Probe", true).is_ok());
        assert!(matches!(
            registry.validate("Probe", false),
            Err(DefinitionError::MissingStore { .. })
        ));
    }

    #[tokio::test]
    async fn erased_handler_round_trips_json() {
        let registry = ActionRegistry::<Probe>::builder()
            .custom(CustomAction::new("echo", Echo))
            .build();
        let entry = registry.get("echo").unwrap();
        let handler = entry.handler.as_ref().unwrap();
        let cx = Context::new(crate::Transport::Http, crate::model::Session::null());
        let out = handler
            .call_value(&Probe, &cx, serde_json::json!({ "text": "hi" }))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({ "text": "hi" }));
    }

    #[test]
    fn query_destructuring_uses_input_schema() {
        let registry = ActionRegistry::<Probe>::builder()
            .custom(CustomAction::new("echo", Echo).methods([Method::Get]))
            .build();
        let handler = registry.get("echo").unwrap().handler.as_ref().unwrap();
        let value = handler.input_from_query("text=hello").unwrap();
        assert_eq!(value, serde_json::json!({ "text": "hello" }));
    }
}
