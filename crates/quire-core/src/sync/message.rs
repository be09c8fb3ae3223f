//! Replication protocol message types
//!
//! Requests and responses exchanged over a WebSocket using CBOR encoding,
//! one message per binary frame. Every response echoes the id of the request
//! it answers.

use serde::{Deserialize, Serialize};

use crate::storage::{ChangeBatch, ReplicatedDoc};

/// Protocol version spoken by this build
pub const PROTOCOL_VERSION: u32 = 1;

pub type EncodeError = ciborium::ser::Error<std::io::Error>;
pub type DecodeError = ciborium::de::Error<std::io::Error>;

/// A request sent to a replication server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub op: Operation,
}

/// Operations a server can perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Handshake; the server answers with its replica id
    Hello { protocol_version: u32 },
    /// Read the change feed after `since`
    Changes { since: u64, limit: usize },
    /// Merge revisions into the server's store
    Apply { docs: Vec<ReplicatedDoc> },
}

/// A server's answer to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Reply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Peer { peer_id: String },
    Changes { batch: ChangeBatch },
    Applied { written: usize },
    Error { message: String },
}

impl Request {
    /// Encode message to CBOR bytes
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        ciborium::from_reader(bytes)
    }
}

impl Response {
    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Reply::Error {
                message: message.into(),
            },
        }
    }

    /// Encode message to CBOR bytes
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        ciborium::from_reader(bytes)
    }
}

fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(msg, &mut bytes)?;
    Ok(bytes)
}
