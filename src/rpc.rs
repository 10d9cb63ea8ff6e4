use serde_json::Value;

/// Failure of a single JSON-RPC exchange, before it is mapped into the
/// pipeline error taxonomy. `Rpc` is the service refusing the request; the
/// other two are the request never being answered properly.
#[derive(Debug)]
pub enum RpcFailure {
    Transport(String),
    Http { status: u16, body: String },
    Rpc {
        code: Option<i64>,
        message: String,
        data: Option<Value>,
    },
}

impl std::fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcFailure::Transport(e) => write!(f, "transport error: {e}"),
            RpcFailure::Http { status, body } => write!(f, "HTTP {status}: {body}"),
            RpcFailure::Rpc { code, message, .. } => match code {
                Some(c) => write!(f, "RPC error {c}: {message}"),
                None => write!(f, "RPC error: {message}"),
            },
        }
    }
}

/// One JSON-RPC 2.0 POST. Returns the `result` member or a classified
/// failure; a missing `result` on a 200 response counts as an RPC error.
pub async fn json_rpc(
    http: &reqwest::Client,
    url: &str,
    method: &str,
    params: Value,
) -> Result<Value, RpcFailure> {
    let req = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let resp = http
        .post(url)
        .json(&req)
        .send()
        .await
        .map_err(|e| RpcFailure::Transport(format!("POST {url} failed: {e}")))?;

    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .map_err(|e| RpcFailure::Transport(format!("failed to decode JSON: {e}")))?;

    if let Some(err) = body.get("error") {
        return Err(RpcFailure::Rpc {
            code: err.get("code").and_then(Value::as_i64),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            data: err.get("data").cloned(),
        });
    }

    if !status.is_success() {
        return Err(RpcFailure::Http {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }

    body.get("result").cloned().ok_or(RpcFailure::Rpc {
        code: None,
        message: "missing result field".to_string(),
        data: None,
    })
}
