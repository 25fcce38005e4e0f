// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 CoSign Client Contributors

//! CHECK command construction and response interpretation
//!
//! The daemon answers a CHECK with one of a handful of codes. Some of them
//! are overloaded (430) or misreported (534), so the raw code and message are
//! kept on every non-success outcome.

use crate::error::{Error, Result};
use crate::types::CheckResponse;

/// Cookie name prefix for a login cookie
pub const LOGIN_COOKIE_PREFIX: &str = "cosign-";
/// Cookie name prefix for a service cookie
pub const SERVICE_COOKIE_PREFIX: &str = "cosign=";

/// Valid cookie (231 and 232 are both used, depending on daemon build)
pub const CODE_CHECK_OK: u16 = 231;
pub const CODE_CHECK_OK_ALT: u16 = 232;
/// Only sent in reply to REKEY
pub const CODE_REKEY_OK: u16 = 233;
/// Logged out, but also sent for unrelated failures
pub const CODE_LOGGED_OUT_OVERLOADED: u16 = 430;
pub const CODE_LOGGED_OUT: u16 = 431;
/// Cookie not in this daemon's database
pub const CODE_NOT_FOUND: u16 = 533;
pub const CODE_SERVICE_NOT_FOUND: u16 = 534;

/// The only 430 message that actually means "logged out"
pub const ALREADY_LOGGED_OUT_MESSAGE: &str = "CHECK: Already logged out";

/// Interpreted result of a CHECK exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Success(CheckResponse),
    LoggedOut,
    /// Try another daemon replica
    NotFound { code: u16, message: String },
    ProtocolError { code: u16, message: String },
}

impl CheckOutcome {
    pub fn into_result(self) -> Result<CheckResponse> {
        match self {
            CheckOutcome::Success(response) => Ok(response),
            CheckOutcome::LoggedOut => Err(Error::LoggedOut),
            CheckOutcome::NotFound { code, message } => Err(Error::NotFound { code, message }),
            CheckOutcome::ProtocolError { code, message } => {
                Err(Error::Protocol { code, message })
            }
        }
    }
}

/// Reject cookies that would break the single-line command framing
pub fn validate_cookie(cookie: &str) -> Result<()> {
    if cookie.is_empty() {
        return Err(Error::MalformedCookie("cookie is empty".to_string()));
    }
    if cookie.chars().any(char::is_whitespace) {
        return Err(Error::MalformedCookie(
            "cookie contains whitespace".to_string(),
        ));
    }
    Ok(())
}

/// Build `CHECK <prefix><service>=<cookie>`
pub fn build_command(service: &str, cookie: &str, service_cookie: bool) -> Result<String> {
    validate_cookie(cookie)?;

    let prefix = if service_cookie {
        SERVICE_COOKIE_PREFIX
    } else {
        LOGIN_COOKIE_PREFIX
    };

    Ok(format!("CHECK {}{}={}", prefix, service, cookie))
}

/// Map a CHECK reply onto its outcome
pub fn interpret_response(code: u16, message: &str, service_cookie: bool) -> Result<CheckOutcome> {
    let outcome = match code {
        CODE_CHECK_OK | CODE_CHECK_OK_ALT => {
            CheckOutcome::Success(parse_payload(message, service_cookie)?)
        }
        CODE_LOGGED_OUT_OVERLOADED if message == ALREADY_LOGGED_OUT_MESSAGE => {
            CheckOutcome::LoggedOut
        }
        CODE_LOGGED_OUT => CheckOutcome::LoggedOut,
        CODE_NOT_FOUND | CODE_SERVICE_NOT_FOUND => CheckOutcome::NotFound {
            code,
            message: message.to_string(),
        },
        // 233, the other 430s and anything unknown
        _ => CheckOutcome::ProtocolError {
            code,
            message: message.to_string(),
        },
    };
    Ok(outcome)
}

/// Parse `<ip> <principal> <realm> [<factor> ...]`
pub fn parse_payload(message: &str, service_cookie: bool) -> Result<CheckResponse> {
    let mut segments: Vec<&str> = message.split(' ').collect();

    // The daemon terminates the factor list with a space
    if segments.len() > 2 && segments.last() == Some(&"") {
        segments.pop();
    }

    if segments.len() < 2 {
        return Err(Error::MalformedPayload(format!(
            "expected an IP and a principal, got {:?}",
            message
        )));
    }
    if segments.len() < 3 {
        return Err(Error::MalformedPayload(format!(
            "no factors in {:?}",
            message
        )));
    }

    Ok(CheckResponse {
        service_cookie,
        ip: segments[0].to_string(),
        principal: segments[1].to_string(),
        realm: segments[2].to_string(),
        factors: segments[3..].iter().map(|s| s.to_string()).collect(),
    })
}
