//! Wire messages for the generic gRPC surface.
//!
//! The envelopes are fixed shapes, so the prost messages are written out
//! here rather than generated from a `.proto` file; record payloads ride
//! in `google.protobuf.Struct` fields. The bridge functions flatten
//! inbound messages to `serde_json::Value` (proto3 defaults included) and
//! re-encode outbound values, silently dropping fields the target message
//! does not know.

use prost_types::value::Kind;
use prost_types::{ListValue, Struct, Value as ProtoValue};
use serde_json::{Map, Number, Value};

use atoll_core::envelope;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRequest {
    #[prost(int64, tag = "1")]
    pub id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListRequest {
    #[prost(message, optional, tag = "1")]
    pub filters: Option<Struct>,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
    #[prost(uint64, tag = "3")]
    pub limit: u64,
    #[prost(string, repeated, tag = "4")]
    pub ordering: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateRequest {
    #[prost(message, optional, tag = "1")]
    pub data: Option<Struct>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateRequest {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(message, optional, tag = "2")]
    pub data: Option<Struct>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteRequest {
    #[prost(int64, tag = "1")]
    pub id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ItemResponse {
    #[prost(message, optional, tag = "1")]
    pub data: Option<Struct>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListResponse {
    #[prost(message, repeated, tag = "1")]
    pub data: Vec<Struct>,
    #[prost(uint64, tag = "2")]
    pub count: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultResponse {
    #[prost(bool, tag = "1")]
    pub result: bool,
}

// ============================================================================
// STRUCT <-> JSON BRIDGE
// ============================================================================

/// Convert a proto `Value` to JSON. Proto numbers are doubles; whole ones
/// come back as integers so primary keys survive the trip.
pub fn proto_to_json(value: ProtoValue) -> Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::NumberValue(n)) => number_to_json(n),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::StructValue(s)) => struct_to_json(s),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(proto_to_json).collect())
        }
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < (i64::MAX as f64) {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Convert a proto `Struct` to a JSON object value.
pub fn struct_to_json(s: Struct) -> Value {
    Value::Object(
        s.fields
            .into_iter()
            .map(|(k, v)| (k, proto_to_json(v)))
            .collect(),
    )
}

/// Convert a JSON value to a proto `Value`.
pub fn json_to_proto(value: Value) -> ProtoValue {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Kind::StringValue(s),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_proto).collect(),
        }),
        Value::Object(map) => Kind::StructValue(json_to_struct_map(map)),
    };
    ProtoValue { kind: Some(kind) }
}

fn json_to_struct_map(map: Map<String, Value>) -> Struct {
    Struct {
        fields: map
            .into_iter()
            .map(|(k, v)| (k, json_to_proto(v)))
            .collect(),
    }
}

/// Encode a JSON value as a proto `Struct`. Non-object values are
/// wrapped under a `data` key so they survive the Struct-only payload
/// slot; non-mapping custom outputs are rare but legal.
pub fn json_to_struct(value: Value) -> Struct {
    match value {
        Value::Object(map) => json_to_struct_map(map),
        Value::Null => Struct::default(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            json_to_struct_map(map)
        }
    }
}

// ============================================================================
// ENVELOPE BRIDGING
// ============================================================================

/// Flatten an inbound `ListRequest` message into the shared envelope.
pub fn flatten_list_request(req: ListRequest) -> envelope::ListRequest {
    let filters = match req.filters.map(struct_to_json) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    envelope::ListRequest {
        filters,
        offset: req.offset,
        limit: req.limit,
        ordering: req.ordering,
    }
}

/// Flatten an inbound `CreateRequest` message, defaults included.
pub fn flatten_create_request(req: CreateRequest) -> Value {
    let mut map = Map::new();
    map.insert(
        "data".to_string(),
        req.data.map(struct_to_json).unwrap_or(Value::Object(Map::new())),
    );
    Value::Object(map)
}

/// Flatten an inbound `UpdateRequest` message, defaults included.
pub fn flatten_update_request(req: UpdateRequest) -> Value {
    let mut map = Map::new();
    map.insert("id".to_string(), Value::from(req.id));
    map.insert(
        "data".to_string(),
        req.data.map(struct_to_json).unwrap_or(Value::Object(Map::new())),
    );
    Value::Object(map)
}

/// Encode an item envelope for the wire.
pub fn encode_item_response(resp: envelope::ItemResponse) -> ItemResponse {
    ItemResponse {
        data: Some(json_to_struct(resp.data)),
    }
}

/// Encode a list envelope for the wire.
pub fn encode_list_response(resp: envelope::ListResponse) -> ListResponse {
    ListResponse {
        data: resp.data.into_iter().map(json_to_struct).collect(),
        count: resp.count,
    }
}
