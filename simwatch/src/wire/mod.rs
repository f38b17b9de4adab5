//! Wire vocabulary
//!
//! The set of events exchanged with the simulation server is closed: every
//! inbound event decodes into an `Inbound` variant through a static table,
//! every outbound message is an `Outbound` variant. Unknown event names are
//! rejected rather than silently accepted.

mod envelope;

pub use envelope::{decode_line, encode_line, Envelope};

use crate::data::{parse_shape, Sample};
use crate::error::WireError;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Server node listing, as carried by the `params` event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeListing {
    pub nodes: BTreeMap<String, ServerNode>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerNode {
    pub class: String,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataUpdate {
    /// Server output name, `<server_node>.<port>`.
    pub name: String,
    pub sample: Sample,
}

/// Events delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Connect,
    ConnectError(String),
    Disconnect,
    Params(NodeListing),
    DataUpdate(DataUpdate),
    Done(Value),
    SpeedReport(Value),
}

/// Events emitted towards the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    GetParams,
    /// Pull request for the next frame of every listed output.
    NewData(Vec<String>),
    Unsubscribe { output: String },
    TestConnection { client: String },
}

type InboundDecoder = fn(Value) -> Result<Inbound, WireError>;
type OutboundDecoder = fn(Value) -> Result<Outbound, WireError>;

static INBOUND_EVENTS: &[(&str, InboundDecoder)] = &[
    ("connect", decode_connect),
    ("connect_error", decode_connect_error),
    ("disconnect", decode_disconnect),
    ("params", decode_params),
    ("data_update", decode_data_update),
    ("done", decode_done),
    ("speed_report", decode_speed_report),
];

static OUTBOUND_EVENTS: &[(&str, OutboundDecoder)] = &[
    ("get_params", decode_get_params),
    ("newdata", decode_newdata),
    ("unsubscribe", decode_unsubscribe),
    ("test_connection", decode_test_connection),
];

impl Inbound {
    pub fn decode(event: &str, data: Value) -> Result<Inbound, WireError> {
        INBOUND_EVENTS
            .iter()
            .find(|(name, _)| *name == event)
            .map(|(_, decode)| decode(data))
            .unwrap_or_else(|| Err(WireError::UnknownEvent(event.to_string())))
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Inbound::Connect => "connect",
            Inbound::ConnectError(_) => "connect_error",
            Inbound::Disconnect => "disconnect",
            Inbound::Params(_) => "params",
            Inbound::DataUpdate(_) => "data_update",
            Inbound::Done(_) => "done",
            Inbound::SpeedReport(_) => "speed_report",
        }
    }
}

impl Outbound {
    pub fn decode(event: &str, data: Value) -> Result<Outbound, WireError> {
        OUTBOUND_EVENTS
            .iter()
            .find(|(name, _)| *name == event)
            .map(|(_, decode)| decode(data))
            .unwrap_or_else(|| Err(WireError::UnknownEvent(event.to_string())))
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Outbound::GetParams => "get_params",
            Outbound::NewData(_) => "newdata",
            Outbound::Unsubscribe { .. } => "unsubscribe",
            Outbound::TestConnection { .. } => "test_connection",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Outbound::GetParams => Value::Null,
            Outbound::NewData(names) => json!(names),
            Outbound::Unsubscribe { output } => json!({ "output": output }),
            Outbound::TestConnection { client } => json!({ "client": client }),
        }
    }
}

fn as_object(event: &'static str, data: Value) -> Result<Map<String, Value>, WireError> {
    match data {
        Value::Object(map) => Ok(map),
        other => Err(WireError::InvalidPayload {
            event,
            reason: format!("expected an object, got {}", other),
        }),
    }
}

fn decode_connect(_: Value) -> Result<Inbound, WireError> {
    Ok(Inbound::Connect)
}

fn decode_disconnect(_: Value) -> Result<Inbound, WireError> {
    Ok(Inbound::Disconnect)
}

fn decode_done(data: Value) -> Result<Inbound, WireError> {
    Ok(Inbound::Done(data))
}

fn decode_speed_report(data: Value) -> Result<Inbound, WireError> {
    Ok(Inbound::SpeedReport(data))
}

fn decode_connect_error(data: Value) -> Result<Inbound, WireError> {
    let reason = match data {
        Value::String(s) => s,
        Value::Null => "unknown".to_string(),
        other => other.to_string(),
    };
    Ok(Inbound::ConnectError(reason))
}

fn decode_params(data: Value) -> Result<Inbound, WireError> {
    let map = as_object("params", data)?;
    let nodes = map
        .into_iter()
        .map(|(name, info)| {
            let class = info
                .get("class")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let outputs = info
                .get("outputs")
                .and_then(Value::as_array)
                .map(|outs| {
                    outs.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            (name, ServerNode { class, outputs })
        })
        .collect();
    Ok(Inbound::Params(NodeListing { nodes }))
}

fn decode_data_update(data: Value) -> Result<Inbound, WireError> {
    let map = as_object("data_update", data)?;
    let name = map
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or(WireError::MissingField {
            event: "data_update",
            field: "name",
        })?
        .to_string();
    let payload = map
        .get("data")
        .filter(|d| !d.is_null())
        .ok_or(WireError::MissingField {
            event: "data_update",
            field: "data",
        })?;
    let shape = match map.get("shape") {
        Some(Value::Null) | None => None,
        Some(dims) => Some(parse_shape(dims).map_err(|reason| WireError::InvalidPayload {
            event: "data_update",
            reason,
        })?),
    };
    let sample = Sample::from_json(payload, shape.as_deref()).map_err(|reason| {
        WireError::InvalidPayload {
            event: "data_update",
            reason,
        }
    })?;
    Ok(Inbound::DataUpdate(DataUpdate { name, sample }))
}

fn decode_get_params(_: Value) -> Result<Outbound, WireError> {
    Ok(Outbound::GetParams)
}

fn decode_newdata(data: Value) -> Result<Outbound, WireError> {
    let names = data
        .as_array()
        .ok_or(WireError::InvalidPayload {
            event: "newdata",
            reason: "expected a list of output names".to_string(),
        })?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    Ok(Outbound::NewData(names))
}

fn decode_unsubscribe(data: Value) -> Result<Outbound, WireError> {
    let output = data
        .get("output")
        .and_then(Value::as_str)
        .ok_or(WireError::MissingField {
            event: "unsubscribe",
            field: "output",
        })?;
    Ok(Outbound::Unsubscribe {
        output: output.to_string(),
    })
}

fn decode_test_connection(data: Value) -> Result<Outbound, WireError> {
    let client = data
        .get("client")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(Outbound::TestConnection {
        client: client.to_string(),
    })
}
