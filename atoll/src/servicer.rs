//! gRPC servicer generation.
//!
//! A wired resource becomes one tower `Service` speaking the gRPC wire
//! protocol, method-per-action: `Get{Noun}`, `List{Nouns}`,
//! `Create{Noun}`, `Update{Noun}`, `Delete{Noun}` plus one method per
//! custom action. The service name comes from the resource's `SERVICE`
//! constant; a resource that never declared one cannot produce a
//! servicer.
//!
//! Unknown methods answer grpc-status 12 (Unimplemented), matching what
//! generated tonic servers do.

use std::task::{Context as TaskContext, Poll};

use thiserror::Error;
use tonic::codegen::{empty_body, http, Body, BoxFuture, Service, StdError};
use tonic::server::{Grpc, NamedService, UnaryService};

use atoll_core::naming::rpc_method;
use atoll_core::{envelope, DefinitionError, ServicerNotFound};

use crate::action::ActionKind;
use crate::dispatch::{self, ResourceHost};
use crate::model::Db;
use crate::proto;
use crate::resource::Resource;

/// Why a servicer could not be generated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServicerError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    NotFound(#[from] ServicerNotFound),
}

/// Full `/package.Service/Method` paths for one resource's actions.
struct MethodPaths {
    list: Option<String>,
    get: Option<String>,
    create: Option<String>,
    update: Option<String>,
    delete: Option<String>,
    custom: Vec<(String, &'static str)>,
}

impl MethodPaths {
    fn build<R: Resource>(service: &str, host: &ResourceHost<R>) -> Self {
        let mut paths = Self {
            list: None,
            get: None,
            create: None,
            update: None,
            delete: None,
            custom: Vec::new(),
        };
        for entry in host.registry().entries() {
            let path = format!("/{}/{}", service, rpc_method(entry.name, R::NOUN));
            match entry.kind {
                ActionKind::List => paths.list = Some(path),
                ActionKind::Get => paths.get = Some(path),
                ActionKind::Create => paths.create = Some(path),
                ActionKind::Update => paths.update = Some(path),
                ActionKind::Delete => paths.delete = Some(path),
                ActionKind::Custom => paths.custom.push((path, entry.name)),
            }
        }
        paths
    }
}

/// Generate the gRPC servicer for a resource.
pub fn generate<R: Resource>(resource: R, db: Db) -> Result<ResourceServicer<R>, ServicerError> {
    let host = ResourceHost::new(resource, db)?;
    servicer_for(host)
}

pub(crate) fn servicer_for<R: Resource>(
    host: ResourceHost<R>,
) -> Result<ResourceServicer<R>, ServicerError> {
    let service = R::SERVICE.ok_or_else(|| ServicerNotFound {
        resource: R::NOUN.to_string(),
    })?;
    let methods = std::sync::Arc::new(MethodPaths::build(service, &host));
    Ok(ResourceServicer { host, methods })
}

/// One resource served over gRPC.
pub struct ResourceServicer<R: Resource> {
    host: ResourceHost<R>,
    methods: std::sync::Arc<MethodPaths>,
}

impl<R: Resource> Clone for ResourceServicer<R> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            methods: self.methods.clone(),
        }
    }
}

impl<R: Resource> NamedService for ResourceServicer<R> {
    const NAME: &'static str = match R::SERVICE {
        Some(name) => name,
        None => "",
    };
}

impl<R, B> Service<http::Request<B>> for ResourceServicer<R>
where
    R: Resource,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let path = req.uri().path();

        if self.methods.get.as_deref() == Some(path) {
            let host = self.host.clone();
            return Box::pin(async move {
                let codec = tonic::codec::ProstCodec::default();
                let mut grpc = Grpc::new(codec);
                Ok(grpc.unary(GetSvc(host), req).await)
            });
        }
        if self.methods.list.as_deref() == Some(path) {
            let host = self.host.clone();
            return Box::pin(async move {
                let codec = tonic::codec::ProstCodec::default();
                let mut grpc = Grpc::new(codec);
                Ok(grpc.unary(ListSvc(host), req).await)
            });
        }
        if self.methods.create.as_deref() == Some(path) {
            let host = self.host.clone();
            return Box::pin(async move {
                let codec = tonic::codec::ProstCodec::default();
                let mut grpc = Grpc::new(codec);
                Ok(grpc.unary(CreateSvc(host), req).await)
            });
        }
        if self.methods.update.as_deref() == Some(path) {
            let host = self.host.clone();
            return Box::pin(async move {
                let codec = tonic::codec::ProstCodec::default();
                let mut grpc = Grpc::new(codec);
                Ok(grpc.unary(UpdateSvc(host), req).await)
            });
        }
        if self.methods.delete.as_deref() == Some(path) {
            let host = self.host.clone();
            return Box::pin(async move {
                let codec = tonic::codec::ProstCodec::default();
                let mut grpc = Grpc::new(codec);
                Ok(grpc.unary(DeleteSvc(host), req).await)
            });
        }
        if let Some((_, name)) = self
            .methods
            .custom
            .iter()
            .find(|(method_path, _)| method_path == path)
        {
            let host = self.host.clone();
            let name = *name;
            return Box::pin(async move {
                let codec = tonic::codec::ProstCodec::default();
                let mut grpc = Grpc::new(codec);
                Ok(grpc.unary(CustomSvc(host, name), req).await)
            });
        }

        Box::pin(async move {
            let mut response = http::Response::new(empty_body());
            response
                .headers_mut()
                .insert("grpc-status", http::HeaderValue::from_static("12"));
            response.headers_mut().insert(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static("application/grpc"),
            );
            Ok(response)
        })
    }
}

// ============================================================================
// PER-METHOD UNARY SERVICES
// ============================================================================

struct GetSvc<R: Resource>(ResourceHost<R>);

impl<R: Resource> UnaryService<proto::GetRequest> for GetSvc<R> {
    type Response = proto::ItemResponse;
    type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

    fn call(&mut self, request: tonic::Request<proto::GetRequest>) -> Self::Future {
        let host = self.0.clone();
        Box::pin(async move {
            let req = envelope::GetRequest {
                id: request.into_inner().id,
            };
            let reply = dispatch::rpc_get(&host, req).await?;
            Ok(tonic::Response::new(proto::encode_item_response(reply)))
        })
    }
}

struct ListSvc<R: Resource>(ResourceHost<R>);

impl<R: Resource> UnaryService<proto::ListRequest> for ListSvc<R> {
    type Response = proto::ListResponse;
    type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

    fn call(&mut self, request: tonic::Request<proto::ListRequest>) -> Self::Future {
        let host = self.0.clone();
        Box::pin(async move {
            let req = proto::flatten_list_request(request.into_inner());
            let reply = dispatch::rpc_list(&host, req).await?;
            Ok(tonic::Response::new(proto::encode_list_response(reply)))
        })
    }
}

struct CreateSvc<R: Resource>(ResourceHost<R>);

impl<R: Resource> UnaryService<proto::CreateRequest> for CreateSvc<R> {
    type Response = proto::ItemResponse;
    type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

    fn call(&mut self, request: tonic::Request<proto::CreateRequest>) -> Self::Future {
        let host = self.0.clone();
        Box::pin(async move {
            let payload = proto::flatten_create_request(request.into_inner());
            let reply = dispatch::rpc_create(&host, payload).await?;
            Ok(tonic::Response::new(proto::encode_item_response(reply)))
        })
    }
}

struct UpdateSvc<R: Resource>(ResourceHost<R>);

impl<R: Resource> UnaryService<proto::UpdateRequest> for UpdateSvc<R> {
    type Response = proto::ItemResponse;
    type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

    fn call(&mut self, request: tonic::Request<proto::UpdateRequest>) -> Self::Future {
        let host = self.0.clone();
        Box::pin(async move {
            let payload = proto::flatten_update_request(request.into_inner());
            let reply = dispatch::rpc_update(&host, payload).await?;
            Ok(tonic::Response::new(proto::encode_item_response(reply)))
        })
    }
}

struct DeleteSvc<R: Resource>(ResourceHost<R>);

impl<R: Resource> UnaryService<proto::DeleteRequest> for DeleteSvc<R> {
    type Response = proto::ResultResponse;
    type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

    fn call(&mut self, request: tonic::Request<proto::DeleteRequest>) -> Self::Future {
        let host = self.0.clone();
        Box::pin(async move {
            let req = envelope::DeleteRequest {
                id: request.into_inner().id,
            };
            let reply = dispatch::rpc_delete(&host, req).await?;
            Ok(tonic::Response::new(proto::ResultResponse {
                result: reply.result,
            }))
        })
    }
}

struct CustomSvc<R: Resource>(ResourceHost<R>, &'static str);

impl<R: Resource> UnaryService<prost_types::Struct> for CustomSvc<R> {
    type Response = prost_types::Struct;
    type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

    fn call(&mut self, request: tonic::Request<prost_types::Struct>) -> Self::Future {
        let host = self.0.clone();
        let name = self.1;
        Box::pin(async move {
            let payload = proto::struct_to_json(request.into_inner());
            let reply = dispatch::rpc_custom(&host, name, payload).await?;
            Ok(tonic::Response::new(proto::json_to_struct(reply)))
        })
    }
}
