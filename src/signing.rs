// ─────────────────────────────────────────────────────────────────────────────
// signing.rs — HMAC-SHA256 request signing for the lagger venue's REST API.
//
// Bit-exact contract: the canonical pre-hash string is
//   METHOD || unix_seconds_as_decimal_ascii || path || ("?" || query if query) || body
// `query` is `k=v` pairs joined by `&` in insertion order, with `%2C` decoded
// back to a literal `,` (the venue does not percent-encode commas when it
// recomputes the signature). HMAC-SHA256 of the pre-hash with the API secret,
// hex-lowercase, goes in the `signature` header alongside `api-key` and
// `timestamp`.
//
// Venue documentation has revised this convention more than once — treat a
// first-connect signature rejection as a configuration problem, not a bug
// to retry around.
// ─────────────────────────────────────────────────────────────────────────────
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Canonicalizes query parameters as `k=v` pairs joined by `&`, preserving
/// insertion order, with `%2C` decoded back to a literal comma.
pub fn canonical_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v.replace("%2C", ",")))
        .collect::<Vec<_>>()
        .join("&")
}

/// Builds the exact pre-hash string for a request.
pub fn build_prehash(
    method: &str,
    timestamp_secs: u64,
    path: &str,
    query: Option<&str>,
    body: Option<&str>,
) -> String {
    let mut s = String::with_capacity(64 + path.len());
    s.push_str(method);
    s.push_str(&timestamp_secs.to_string());
    s.push_str(path);
    if let Some(q) = query {
        if !q.is_empty() {
            s.push('?');
            s.push_str(q);
        }
    }
    if let Some(b) = body {
        s.push_str(b);
    }
    s
}

/// HMAC-SHA256 of `prehash` under `secret`, returned as lowercase hex.
pub fn hmac_hex(secret: &str, prehash: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any size");
    mac.update(prehash.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Convenience wrapper: builds the pre-hash and signs it in one step.
pub fn sign_request(
    method: &str,
    timestamp_secs: u64,
    path: &str,
    query: Option<&[(String, String)]>,
    body: Option<&str>,
    secret: &str,
) -> String {
    let query_canonical = query.map(|q| canonical_query(q));
    let prehash = build_prehash(
        method,
        timestamp_secs,
        path,
        query_canonical.as_deref(),
        body,
    );
    hmac_hex(secret, &prehash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_and_body_has_no_question_mark() {
        let s = build_prehash("GET", 1_700_000_000, "/orders", None, None);
        assert_eq!(s, "GET1700000000/orders");
    }

    #[test]
    fn query_with_comma_is_decoded() {
        // Caller percent-encodes the comma as %2C (required by most query
        // encoders); the signing canonicalization must decode it back before
        // hashing, per the venue's signing convention.
        let query = vec![("states".to_string(), "open%2Cpending".to_string())];
        let canonical = canonical_query(&query);
        assert_eq!(canonical, "states=open,pending");
    }

    #[test]
    fn prehash_includes_query_with_leading_question_mark() {
        let query = vec![("product_id".to_string(), "27".to_string())];
        let canonical = canonical_query(&query);
        let s = build_prehash("GET", 1_700_000_000, "/orders", Some(&canonical), None);
        assert_eq!(s, "GET1700000000/orders?product_id=27");
    }

    #[test]
    fn prehash_includes_exact_body_bytes() {
        let body = r#"{"size":"1.0"}"#;
        let s = build_prehash("POST", 1_700_000_000, "/orders", None, Some(body));
        assert_eq!(s, r#"POST1700000000/orders{"size":"1.0"}"#);
    }

    #[test]
    fn signature_is_deterministic_for_identical_inputs() {
        let a = sign_request("POST", 1_700_000_000, "/orders", None, Some("{}"), "secret");
        let b = sign_request("POST", 1_700_000_000, "/orders", None, Some("{}"), "secret");
        assert_eq!(a, b);
    }

    #[test]
    fn signature_changes_with_timestamp() {
        let a = sign_request("POST", 1_700_000_000, "/orders", None, Some("{}"), "secret");
        let b = sign_request("POST", 1_700_000_001, "/orders", None, Some("{}"), "secret");
        assert_ne!(a, b);
    }

    #[test]
    fn signature_is_lowercase_hex() {
        let sig = sign_request("GET", 1_700_000_000, "/orders", None, None, "secret");
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(sig.len(), 64); // SHA-256 -> 32 bytes -> 64 hex chars
    }
}
