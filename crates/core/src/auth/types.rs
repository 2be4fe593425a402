use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// User id carried by unauthenticated callers.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Request information for authentication
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub headers: HashMap<String, String>,
    pub source_ip: IpAddr,
}

/// Authenticated identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub method: String,
    pub claims: HashMap<String, serde_json::Value>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            user_id: ANONYMOUS_USER.to_string(),
            method: "none".to_string(),
            claims: HashMap::new(),
        }
    }

    /// Whether this identity came from a caller without credentials.
    pub fn is_anonymous(&self) -> bool {
        self.method == "none"
    }
}
