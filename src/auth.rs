use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use sha2::{Digest, Sha256};

use crate::config::AppConfig;

/// Proxy headers carrying the original client address, most trusted first.
/// `X-Forwarded-For` is handled separately since it holds a chain.
const CLIENT_IP_HEADERS: [&str; 3] = ["CF-Connecting-IP", "True-Client-IP", "X-Real-IP"];

/// Request guard: the best guess at the visitor's address.
///   1. CF-Connecting-IP (Cloudflare)
///   2. True-Client-IP (Cloudflare Enterprise / Akamai)
///   3. X-Real-IP (nginx)
///   4. X-Forwarded-For, leftmost entry
///   5. the socket peer
///
/// `None` when nothing is known (e.g. local test clients).
pub struct ClientIp(pub Option<String>);

fn first_non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let headers = request.headers();

        for name in CLIENT_IP_HEADERS {
            if let Some(ip) = headers.get_one(name).and_then(first_non_empty) {
                return Outcome::Success(ClientIp(Some(ip)));
            }
        }

        if let Some(ip) = headers
            .get_one("X-Forwarded-For")
            .and_then(|chain| chain.split(',').next())
            .and_then(first_non_empty)
        {
            return Outcome::Success(ClientIp(Some(ip)));
        }

        Outcome::Success(ClientIp(request.client_ip().map(|ip| ip.to_string())))
    }
}

/// Request guard for admin endpoints. Passes when no admin token is
/// configured; otherwise the request must present it as
/// `Authorization: Bearer <token>` or `X-Admin-Token: <token>`.
pub struct AdminToken;

fn presented_token<'a>(request: &'a Request<'_>) -> Option<&'a str> {
    let headers = request.headers();
    headers
        .get_one("Authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get_one("X-Admin-Token"))
        .map(str::trim)
}

fn digest(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Compare digests so the comparison does not depend on where the strings differ.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    digest(expected) == digest(presented)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminToken {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let expected = match request.rocket().state::<AppConfig>() {
            Some(config) => config.admin_token(),
            None => return Outcome::Error((Status::InternalServerError, ())),
        };
        let Some(expected) = expected else {
            return Outcome::Success(AdminToken);
        };
        match presented_token(request) {
            Some(token) if token_matches(expected, token) => Outcome::Success(AdminToken),
            _ => {
                log::warn!(
                    "Rejected admin request {} {}",
                    request.method(),
                    request.uri()
                );
                Outcome::Error((Status::Unauthorized, ()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        assert!(token_matches("s3cret", "s3cret"));
        assert!(!token_matches("s3cret", "s3cre"));
        assert!(!token_matches("s3cret", ""));
    }

    #[test]
    fn test_first_non_empty() {
        assert_eq!(first_non_empty("  203.0.113.1 "), Some("203.0.113.1".to_string()));
        assert_eq!(first_non_empty("   "), None);
    }
}
