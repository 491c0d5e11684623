//! Wire payloads exchanged between nodes.
//!
//! Every payload is serde-derived and encoded with MessagePack
//! (`rmp_serde::to_vec_named`) by the transport, so field names survive the
//! wire and payloads stay decodable across protocol-compatible versions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RPC envelope
// ---------------------------------------------------------------------------

/// Caller identity attached to every outbound call and cast.
///
/// `instance` is a random per-process id that disambiguates two processes
/// accidentally configured with the same `node_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub node_id: String,
    pub instance: Uuid,
}

/// One RPC invocation as it travels the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub context: RequestContext,
    pub method: String,
    pub args: Value,
}

/// Reply to a unicast call. Endpoint-raised errors travel as `Err` so the
/// caller can distinguish them from transport-level failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcResponse {
    Ok(Value),
    Err { kind: String, message: String },
}

// ---------------------------------------------------------------------------
// Publication payloads
// ---------------------------------------------------------------------------

/// Legacy unsequenced publication: `data` is always a full snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishPayload {
    pub publisher: String,
    pub table: String,
    pub data: Value,
}

/// Sequenced publication: `data` is a full snapshot or an incremental diff,
/// tagged with a sequence number so receivers can detect gaps and re-baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedPublishPayload {
    pub publisher: String,
    pub table: String,
    pub data: Value,
    pub is_snapshot: bool,
    pub seqnum: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Helper: serialize to MsgPack named and deserialize back, asserting equality.
    fn round_trip<T>(value: &T)
    where
        T: Serialize + for<'de> Deserialize<'de> + PartialEq + std::fmt::Debug,
    {
        let bytes = rmp_serde::to_vec_named(value).expect("serialize failed");
        let decoded: T = rmp_serde::from_slice(&bytes).expect("deserialize failed");
        assert_eq!(value, &decoded);
    }

    fn sample_context() -> RequestContext {
        RequestContext {
            node_id: "node-1".to_string(),
            instance: Uuid::new_v4(),
        }
    }

    #[test]
    fn serde_rpc_request_with_object_args() {
        round_trip(&RpcRequest {
            context: sample_context(),
            method: "get_snapshot".to_string(),
            args: json!({"table": "ports"}),
        });
    }

    #[test]
    fn serde_rpc_request_with_null_args() {
        round_trip(&RpcRequest {
            context: sample_context(),
            method: "ping".to_string(),
            args: Value::Null,
        });
    }

    #[test]
    fn serde_rpc_response_ok() {
        round_trip(&RpcResponse::Ok(json!([["row", 1], ["row", 2]])));
    }

    #[test]
    fn serde_rpc_response_err() {
        round_trip(&RpcResponse::Err {
            kind: "service_not_found".to_string(),
            message: "service 'nova' could not be found".to_string(),
        });
    }

    #[test]
    fn serde_publish_payload() {
        round_trip(&PublishPayload {
            publisher: "nova".to_string(),
            table: "servers".to_string(),
            data: json!([["vm-1", "active"], ["vm-2", "paused"]]),
        });
    }

    #[test]
    fn serde_sequenced_publish_snapshot() {
        round_trip(&SequencedPublishPayload {
            publisher: "nova".to_string(),
            table: "servers".to_string(),
            data: json!([["vm-1", "active"]]),
            is_snapshot: true,
            seqnum: 0,
        });
    }

    #[test]
    fn serde_sequenced_publish_diff() {
        round_trip(&SequencedPublishPayload {
            publisher: "nova".to_string(),
            table: "servers".to_string(),
            data: json!({"added": [["vm-3", "building"]], "removed": []}),
            is_snapshot: false,
            seqnum: 17,
        });
    }
}
