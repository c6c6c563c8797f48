//! Declare a resource once, serve it over HTTP and gRPC.
//!
//! A [`Resource`] bundles a serde schema, an action registry, filter
//! declarations, permissions, and an optional persistence store. The
//! framework derives both transports from that one declaration:
//! [`router::generate`] produces an axum router following REST
//! conventions and [`servicer::generate`] produces a tonic service
//! following generic-envelope RPC conventions. Both run the same
//! dispatch pipeline, so permissions, session lifecycle, and action
//! semantics cannot drift between transports.
//!
//! ```no_run
//! use atoll::{App, AppConfig};
//! # use atoll::{ActionRegistry, FilterDef, Resource};
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Clone, Debug, Default, Serialize, Deserialize)]
//! # struct Greeting { id: i64, content: String }
//! # struct Greeter;
//! # impl Resource for Greeter {
//! #     type Schema = Greeting;
//! #     const NOUN: &'static str = "Greeter";
//! #     fn actions() -> ActionRegistry<Self> {
//! #         ActionRegistry::builder().build()
//! #     }
//! # }
//! # async fn run() -> atoll::ApiResult<()> {
//! atoll::init_tracing();
//! let app = App::new(AppConfig::from_env()).mount(Greeter)?;
//! app.serve().await
//! # }
//! ```

pub mod action;
pub mod app;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod permission;
pub mod pg;
pub mod proto;
pub mod resource;
pub mod router;
pub mod servicer;

pub use action::{ActionDef, ActionKind, ActionRegistry, CustomAction, Handler, Method};
pub use app::{init_tracing, App};
pub use config::AppConfig;
pub use context::{Context, Transport};
pub use dispatch::ResourceHost;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use model::{Db, Listing, MemoryStore, Session, SessionFactory, Store};
pub use permission::{AllowAny, Permission, RpcOnly};
pub use pg::{PgConfig, PgDb, PgStore};
pub use resource::{FilterDef, FilterType, Resource};
pub use servicer::ResourceServicer;

pub use atoll_core as core;
pub use atoll_core::envelope;
pub use atoll_core::filter;
pub use atoll_core::naming;
pub use atoll_core::paginate::{Page, DEFAULT_LIMIT};
