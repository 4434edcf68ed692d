//! Jito Block Engine JSON-RPC envelopes

use serde::{Deserialize, Serialize};

/// `sendBundle` request. Transactions are base64 encoded.
#[derive(Debug, Clone, Serialize)]
pub struct BundleRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: (Vec<String>, EncodingParam),
}

#[derive(Debug, Clone, Serialize)]
pub struct EncodingParam {
    pub encoding: &'static str,
}

impl BundleRequest {
    pub fn new(transactions: Vec<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: 1,
            method: "sendBundle",
            params: (transactions, EncodingParam { encoding: "base64" }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(BundleRequest::new(vec!["AQID".to_string()])).unwrap();
        assert_eq!(json["method"], "sendBundle");
        assert_eq!(json["params"][0][0], "AQID");
        assert_eq!(json["params"][1]["encoding"], "base64");
    }

    #[test]
    fn test_response_parsing() {
        let ok: JsonRpcResponse<String> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"b1d3-uuid"}"#).unwrap();
        assert_eq!(ok.result.as_deref(), Some("b1d3-uuid"));

        let err: JsonRpcResponse<String> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bundle contains an expired blockhash"}}"#,
        )
        .unwrap();
        assert_eq!(err.error.map(|e| e.code), Some(-32602));
    }
}
