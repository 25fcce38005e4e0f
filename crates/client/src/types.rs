// Common types for the CoSign client

use serde::{Deserialize, Serialize};

/// One response from a daemon: a three-digit status code and its text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub message: String,
}

impl Reply {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

/// User information returned for a valid cookie
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResponse {
    /// Whether the validated cookie was a service cookie (as requested by the caller)
    pub service_cookie: bool,
    /// IP address the user logged in from
    pub ip: String,
    /// User name
    pub principal: String,
    /// Authentication realm (the first factor)
    pub realm: String,
    /// Factors following the realm
    pub factors: Vec<String>,
}

impl CheckResponse {
    /// Realm followed by the remaining factors, in daemon order
    pub fn all_factors(&self) -> Vec<&str> {
        std::iter::once(self.realm.as_str())
            .chain(self.factors.iter().map(String::as_str))
            .collect()
    }
}

/// Connection state of one daemon, as reported by `Client::daemons`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonStatus {
    pub address: std::net::SocketAddr,
    pub ready: bool,
}
