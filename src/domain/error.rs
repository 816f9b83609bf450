use serde_json::{json, Value};

/// Gateway-level routing errors. Downstream handler failures are carried
/// through `Downstream` verbatim, codes included.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("MethodNotFound")]
    MethodNotFound,
    #[error("{0}")]
    InvalidParams(String),
    #[error("NotAvailable")]
    NotAvailable,
    #[error("{message}")]
    Downstream { code: i32, message: String },
}

impl GatewayError {
    pub fn code(&self) -> i32 {
        match self {
            GatewayError::MethodNotFound => -32601,
            GatewayError::InvalidParams(_) => -32602,
            GatewayError::NotAvailable => -50200,
            GatewayError::Downstream { code, .. } => *code,
        }
    }

    /// JSON-RPC error body: `{"code": <n>, "message": <s>}`.
    pub fn body(&self) -> Value {
        json!({ "code": self.code(), "message": self.to_string() })
    }
}
