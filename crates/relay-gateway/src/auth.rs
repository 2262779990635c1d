//! Caller authentication and cross-worker authorization.
//!
//! Two independent checks guard every privileged endpoint: the shared relay token (constant-time
//! compared, "Authentication") and the `X-Requester` attribution header naming which
//! worker is acting. Authorization classes on top of that:
//! apex may act on any worker; any other whitelisted worker only on itself; health-role workers
//! may additionally *read* across workers.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::errors::RelayError;
use crate::state::Relay;

pub const REQUESTER_HEADER: &str = "x-requester";

/// Verifies the bearer relay token in constant time. Any mismatch in length or content is an
/// auth failure; no detail is returned to the caller.
pub fn check_relay_token(relay: &Relay, headers: &HeaderMap) -> Result<(), RelayError> {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(RelayError::AuthFailure)?;

    let expected = relay.cfg.relay_token.as_bytes();
    let presented = presented.as_bytes();
    if expected.len() != presented.len() || expected.ct_eq(presented).unwrap_u8() != 1 {
        return Err(RelayError::AuthFailure);
    }
    Ok(())
}

/// Resolves the `X-Requester` header to a whitelisted identity. Missing or unknown values
/// behave as "anonymous" and carry no authorization.
pub fn requester(headers: &HeaderMap) -> Option<String> {
    let name = headers.get(REQUESTER_HEADER)?.to_str().ok()?;
    Relay::attribute(Some(name)).map(|s| s.to_string())
}

/// `true` if `requester` may perform a write on behalf of `target`: apex acting on anyone, or a
/// worker acting on itself.
pub fn can_write(requester: &str, target: &str) -> bool {
    relay_core::worker::is_apex(requester) || requester == target
}

/// `true` if `requester` may *read* `target`'s state: apex, the worker itself, or a
/// currently health-role worker reading across workers.
pub fn can_read(relay: &Relay, requester: &str, target: &str) -> bool {
    if relay_core::worker::is_apex(requester) || requester == target {
        return true;
    }
    relay
        .availability
        .get(requester)
        .and_then(|w| w.role)
        .is_some_and(|role| role.can_read_cross_worker())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn relay_token_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let relay = crate::test_support::build_test_relay(dir.path(), "correct-token");
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong-token"),
        );
        assert!(check_relay_token(&relay, &headers).is_err());
    }

    #[test]
    fn relay_token_match_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let relay = crate::test_support::build_test_relay(dir.path(), "correct-token");
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer correct-token"),
        );
        assert!(check_relay_token(&relay, &headers).is_ok());
    }

    #[test]
    fn unknown_requester_is_anonymous() {
        let mut headers = HeaderMap::new();
        headers.insert("x-requester", HeaderValue::from_static("NotAWorker"));
        assert!(requester(&headers).is_none());
    }

    #[test]
    fn worker_cannot_write_for_another_worker() {
        assert!(!can_write("Atlas", "Bishop"));
        assert!(can_write("Atlas", "Atlas"));
        assert!(can_write(relay_core::worker::APEX, "Bishop"));
    }
}
