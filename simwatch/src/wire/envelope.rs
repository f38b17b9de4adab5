//! JSON-lines envelope
//!
//! On a byte stream every event travels as one line of JSON:
//! `{"event": "<name>", "data": <payload>}` terminated by `\n`.

use super::{Inbound, Outbound};
use crate::error::WireError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: &str, data: Value) -> Envelope {
        Envelope {
            event: event.to_string(),
            data,
        }
    }

    pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    pub fn from_line(line: &[u8]) -> Result<Envelope, WireError> {
        Ok(serde_json::from_slice(trim_line(line))?)
    }
}

impl From<&Outbound> for Envelope {
    fn from(msg: &Outbound) -> Envelope {
        Envelope::new(msg.event_name(), msg.payload())
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &line[..end]
}

pub fn encode_line(msg: &Outbound) -> Result<Vec<u8>, serde_json::Error> {
    Envelope::from(msg).to_line()
}

pub fn decode_line(line: &[u8]) -> Result<Inbound, WireError> {
    let env = Envelope::from_line(line)?;
    Inbound::decode(&env.event, env.data)
}
