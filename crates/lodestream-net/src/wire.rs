use bytes::Bytes;
use lodestream_core::{AssetHash, AssetKind};
use serde::{Deserialize, Serialize};

use crate::{NetError, NetResult};

/// Wire protocol version spoken in the handshake.
pub const WIRE_VERSION: u32 = 1;

/// Authorization context presented once per connection, covering every
/// resource namespace the session may request from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub namespaces: Vec<String>,
    pub token: Option<String>,
}

/// Frames sent client → server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Hello { version: u32, auth: AuthContext },
    Request(RequestBatch),
}

/// A batch of same-kind asset requests carried in one wire message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBatch {
    pub kind: AssetKind,
    pub hashes: Vec<AssetHash>,
}

/// Frames sent server → client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    HelloAck { accepted_namespaces: Vec<String> },
    Item(ResponseItem),
}

/// One resolved asset, streamed back as its own frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseItem {
    pub hash: AssetHash,
    pub kind: AssetKind,
    pub body: ResponseBody,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    /// Compressed asset bytes.
    Blob(Vec<u8>),
    /// Per-hash rejection with a service error code; terminal for the hash.
    Rejected { code: u16 },
}

pub fn encode_client(msg: &ClientMessage) -> NetResult<Bytes> {
    let bytes = bincode::serde::encode_to_vec(msg, bincode::config::legacy())
        .map_err(|e| NetError::Codec(e.to_string()))?;
    Ok(Bytes::from(bytes))
}

pub fn decode_client(frame: &[u8]) -> NetResult<ClientMessage> {
    let (msg, _) = bincode::serde::decode_from_slice(frame, bincode::config::legacy())
        .map_err(|e| NetError::Codec(e.to_string()))?;
    Ok(msg)
}

pub fn encode_server(msg: &ServerMessage) -> NetResult<Bytes> {
    let bytes = bincode::serde::encode_to_vec(msg, bincode::config::legacy())
        .map_err(|e| NetError::Codec(e.to_string()))?;
    Ok(Bytes::from(bytes))
}

pub fn decode_server(frame: &[u8]) -> NetResult<ServerMessage> {
    let (msg, _) = bincode::serde::decode_from_slice(frame, bincode::config::legacy())
        .map_err(|e| NetError::Codec(e.to_string()))?;
    Ok(msg)
}
