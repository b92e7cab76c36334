//! Wire protocol shared by the server and the CLI.
//!
//! Every frame is a 4-byte big-endian length followed by a MessagePack
//! payload (named fields). Requests are tagged by `cmd`; responses are
//! untagged and distinguished by their field names. A `requestId` sent with
//! a request is echoed back on its response.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::model::{Node, NodeInput, NodeType, NodeWithType, ResolvedEdge};
use crate::workflow::RunReport;

pub const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Request {
    Ping,

    /// Submit an ingestion batch; answered with `RunAccepted`.
    PutNodes { nodes: Vec<NodeInput> },

    /// Run status. With `waitMs`, blocks until the run finishes or the wait
    /// elapses.
    GetRun {
        #[serde(rename = "runId")]
        run_id: String,
        #[serde(default, rename = "waitMs")]
        wait_ms: Option<u64>,
    },

    RetryRun {
        #[serde(rename = "runId")]
        run_id: String,
    },

    // Reads
    GetNode { id: String },
    ListRecentNodes {
        #[serde(default)]
        limit: Option<usize>,
    },
    ListNodesByType {
        #[serde(rename = "typeId")]
        type_id: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    GetDependencies {
        id: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    GetDependants {
        id: String,
        #[serde(default)]
        limit: Option<usize>,
    },

    // Types
    PutType { id: String, name: String },
    DeleteType { id: String },
    ListTypes,

    Shutdown,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::PutNodes { .. } => "putNodes",
            Request::GetRun { .. } => "getRun",
            Request::RetryRun { .. } => "retryRun",
            Request::GetNode { .. } => "getNode",
            Request::ListRecentNodes { .. } => "listRecentNodes",
            Request::ListNodesByType { .. } => "listNodesByType",
            Request::GetDependencies { .. } => "getDependencies",
            Request::GetDependants { .. } => "getDependants",
            Request::PutType { .. } => "putType",
            Request::DeleteType { .. } => "deleteType",
            Request::ListTypes => "listTypes",
            Request::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok { ok: bool },
    Pong { pong: bool, version: String },
    RunAccepted {
        #[serde(rename = "runId")]
        run_id: String,
    },
    Run { run: RunReport },
    Node { node: Option<NodeWithType> },
    Nodes { nodes: Vec<Node> },
    Edges { edges: Vec<ResolvedEdge> },
    Types { types: Vec<NodeType> },
    Type {
        #[serde(rename = "nodeType")]
        node_type: NodeType,
    },
    Deleted { deleted: bool },
    ErrorWithCode { error: String, code: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default, rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub response: Response,
}

// ============================================================================
// Encoding
// ============================================================================

fn invalid_data(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

pub fn encode<T: Serialize>(message: &T) -> io::Result<Vec<u8>> {
    rmp_serde::to_vec_named(message).map_err(invalid_data)
}

pub fn decode_request(bytes: &[u8]) -> io::Result<RequestEnvelope> {
    rmp_serde::from_slice(bytes).map_err(invalid_data)
}

/// Responses are only serialized by the server; clients read them as
/// generic JSON.
pub fn decode_response(bytes: &[u8]) -> io::Result<serde_json::Value> {
    rmp_serde::from_slice(bytes).map_err(invalid_data)
}

// ============================================================================
// Framing
// ============================================================================

fn check_len(len: usize) -> io::Result<()> {
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {len} bytes"),
        ));
    }
    Ok(())
}

/// `Ok(None)` on a clean EOF before the length prefix.
/// Returns `None` on EOF before any byte of the length prefix.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    if !prefix_complete(filled)? {
        return Ok(None);
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    check_len(len)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(Some(buf))
}

/// `false` for a clean EOF, an error for a prefix cut short.
fn prefix_complete(filled: usize) -> io::Result<bool> {
    match filled {
        0 => Ok(false),
        4 => Ok(true),
        n => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("truncated length prefix: {n} of 4 bytes"),
        )),
    }
}

pub fn write_frame<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    check_len(data.len())?;
    writer.write_all(&(data.len() as u32).to_be_bytes())?;
    writer.write_all(data)?;
    writer.flush()
}

pub async fn read_frame_async<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    if !prefix_complete(filled)? {
        return Ok(None);
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    check_len(len)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn write_frame_async<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    check_len(data.len())?;
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_request_envelope_round_trip() {
        let envelope = RequestEnvelope {
            request_id: Some("r-1".to_string()),
            request: Request::ListNodesByType {
                type_id: "lib".to_string(),
                limit: Some(5),
            },
        };
        let bytes = encode(&envelope).unwrap();
        assert_eq!(decode_request(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_put_nodes_defaults() {
        // Missing metadata and dependencies fall back to {} and [].
        let wire = json!({
            "cmd": "putNodes",
            "nodes": [{"id": "a", "name": "A", "typeId": "lib"}]
        });
        let bytes = rmp_serde::to_vec_named(&wire).unwrap();
        let envelope = decode_request(&bytes).unwrap();
        assert_eq!(envelope.request_id, None);
        match envelope.request {
            Request::PutNodes { nodes } => {
                assert_eq!(nodes.len(), 1);
                assert_eq!(nodes[0].metadata, json!({}));
                assert!(nodes[0].dependencies.is_empty());
            }
            other => panic!("Expected PutNodes, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let bytes = rmp_serde::to_vec_named(&json!({"cmd": "dropTable"})).unwrap();
        assert!(decode_request(&bytes).is_err());
    }

    #[test]
    fn test_response_envelope_echoes_request_id() {
        let envelope = ResponseEnvelope {
            request_id: Some("42".to_string()),
            response: Response::ErrorWithCode {
                error: "boom".to_string(),
                code: "STORE_UNAVAILABLE".to_string(),
            },
        };
        let value = decode_response(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"requestId": "42", "error": "boom", "code": "STORE_UNAVAILABLE"})
        );
    }

    #[test]
    fn test_frame_round_trip_and_eof() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let len = (MAX_FRAME_BYTES as u32 + 1).to_be_bytes();
        let mut cursor = Cursor::new(len.to_vec());
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_async_frames() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame_async(&mut a, b"ping").await.unwrap();
        drop(a);
        assert_eq!(read_frame_async(&mut b).await.unwrap(), Some(b"ping".to_vec()));
        assert_eq!(read_frame_async(&mut b).await.unwrap(), None);
    }

    #[test]
    fn test_truncated_length_prefix_is_an_error() {
        let mut cursor = Cursor::new(vec![0u8, 0]);
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut empty = Cursor::new(Vec::new());
        assert_eq!(read_frame(&mut empty).unwrap(), None);
    }

    #[tokio::test]
    async fn test_async_truncated_length_prefix_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 0, 1]).await.unwrap();
        drop(a);
        let err = read_frame_async(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
