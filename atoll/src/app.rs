//! Application shell wiring mounted resources into servers.
//!
//! Mounting a resource nests its HTTP router under the noun's endpoint
//! path and, when the resource declares a gRPC service name, registers
//! its servicer on the gRPC side. One host per resource backs both
//! transports.

use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tokio::net::TcpListener;
use tonic::service::RoutesBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use atoll_core::error::DefinitionError;
use atoll_core::naming;

use crate::config::AppConfig;
use crate::dispatch::ResourceHost;
use crate::error::{ApiError, ApiResult};
use crate::model::Db;
use crate::resource::Resource;
use crate::router::router_for;
use crate::servicer::servicer_for;

/// Initialize structured logging from `RUST_LOG`, with a sane default.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("atoll=debug,tower_http=debug,info"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Builder for an application serving resources over HTTP and gRPC.
pub struct App {
    config: AppConfig,
    db: Db,
    router: Router,
    rpc: RoutesBuilder,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            db: Db::detached(),
            router: Router::new(),
            rpc: RoutesBuilder::default(),
        }
    }

    /// Use a shared database for every resource mounted after this call.
    pub fn with_db(mut self, db: Db) -> Self {
        self.db = db;
        self
    }

    /// Mount a resource on both transports.
    pub fn mount<R: Resource>(mut self, resource: R) -> Result<Self, DefinitionError> {
        let host = ResourceHost::new(resource, self.db.clone())?;
        let path = naming::endpoint_path(R::NOUN);
        tracing::info!(noun = R::NOUN, %path, "Mounting resource");
        self.router = self.router.nest(&path, router_for(host.clone()));
        if R::SERVICE.is_some() {
            if let Ok(servicer) = servicer_for(host) {
                self.rpc.add_service(servicer);
            }
        }
        Ok(self)
    }

    /// Finished HTTP router with CORS and request tracing applied.
    pub fn into_router(self) -> Router {
        let cors = build_cors_layer(&self.config);
        self.router.layer(TraceLayer::new_for_http()).layer(cors)
    }

    /// Serve both transports until either fails or a shutdown signal
    /// arrives.
    pub async fn serve(self) -> ApiResult<()> {
        let http_addr = self.config.http_addr()?;
        let grpc_addr = self.config.grpc_addr()?;
        let cors = build_cors_layer(&self.config);
        let router = self.router.layer(TraceLayer::new_for_http()).layer(cors);
        let routes = self.rpc.routes();

        let listener = TcpListener::bind(http_addr)
            .await
            .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", http_addr, e)))?;
        tracing::info!(%http_addr, %grpc_addr, "Starting servers");

        let http = axum::serve(listener, router);
        let grpc = tonic::transport::Server::builder()
            .add_routes(routes)
            .serve(grpc_addr);

        tokio::select! {
            result = http => {
                result.map_err(|e| ApiError::internal_error(format!("HTTP server error: {}", e)))?;
            }
            result = grpc => {
                result.map_err(|e| ApiError::internal_error(format!("gRPC server error: {}", e)))?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
            }
        }

        Ok(())
    }

    /// Serve only the HTTP side.
    pub async fn serve_http(self) -> ApiResult<()> {
        let addr = self.config.http_addr()?;
        let router = self.into_router();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;
        tracing::info!(%addr, "Starting HTTP server");

        let server = axum::serve(listener, router);
        tokio::select! {
            result = server => {
                result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
            }
        }
        Ok(())
    }

    /// Serve only the gRPC side.
    pub async fn serve_grpc(self) -> ApiResult<()> {
        let addr = self.config.grpc_addr()?;
        tracing::info!(%addr, "Starting gRPC server");

        tonic::transport::Server::builder()
            .add_routes(self.rpc.routes())
            .serve_with_shutdown(addr, async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutdown signal received");
            })
            .await
            .map_err(|e| ApiError::internal_error(format!("gRPC server error: {}", e)))
    }
}

fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        // Development mode: allow all origins
        tracing::info!("CORS: allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: restricting origins");
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}
