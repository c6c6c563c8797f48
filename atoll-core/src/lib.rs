//! # Atoll Core
//!
//! Pure data types for the Atoll resource framework. This crate carries
//! everything the transports agree on without touching any I/O: the filter
//! expression language, the generic request/response envelopes, offset
//! pagination, the naming strategy, and the declaration-time error types.
//!
//! The `atoll` crate builds the HTTP router, the gRPC servicer and the
//! dispatcher on top of these types.
//!
//! ## Features
//!
//! - `openapi` (default): derives `utoipa::ToSchema` on the envelope types
//!   for OpenAPI document generation.

pub mod envelope;
pub mod error;
pub mod filter;
pub mod naming;
pub mod paginate;

pub use envelope::{
    CreateRequest, DeleteRequest, GetRequest, ItemResponse, ListRequest, ListResponse,
    ResultResponse, UpdateRequest,
};
pub use error::{DefinitionError, ReturnTypeError, ServicerNotFound};
pub use filter::{
    parse_ordering, translate, DatePart, Direction, FilterExpr, FilterOp, OrderBy, PartCmp,
    OPERATOR_SPLITTER, ORDERING_REVERSER,
};
pub use paginate::{effective_limit, paginate_slice, Page, DEFAULT_LIMIT};
