//! Generic request and response envelopes.
//!
//! These eight shapes are the shared wire contract for model-backed
//! resources: the same field names appear in the HTTP JSON bodies and in
//! the proto messages, so one envelope round-trips through either
//! transport. Every field defaults, matching proto3 semantics where an
//! absent field decodes to its zero value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fetch a single record by primary key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GetRequest {
    #[serde(default)]
    pub id: i64,
}

/// List records with filters, pagination and ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListRequest {
    /// Filter mapping, `field__operator` keys to operand values.
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub filters: Map<String, Value>,
    #[serde(default)]
    pub offset: u64,
    /// Page size; zero means the framework default.
    #[serde(default)]
    pub limit: u64,
    /// Ordering expressions, `-` prefix for descending.
    #[serde(default)]
    pub ordering: Vec<String>,
}

/// Create a record from a field mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateRequest {
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: Map<String, Value>,
}

/// Patch a record by primary key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateRequest {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: Map<String, Value>,
}

/// Delete a record by primary key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DeleteRequest {
    #[serde(default)]
    pub id: i64,
}

/// A single record wrapped for the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ItemResponse {
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: Value,
}

/// One page of records plus the unpaginated total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListResponse {
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<Object>))]
    pub data: Vec<Value>,
    #[serde(default)]
    pub count: u64,
}

/// Outcome of an operation with no record to return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ResultResponse {
    #[serde(default)]
    pub result: bool,
}
