//! HMAC-SHA256 request signing for the futures REST API.
//!
//! Signed requests carry every parameter in the query string, URL-encoded in
//! insertion order, followed by a trailing `signature=<hex>` computed over the
//! exact query text that precedes it.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Request parameters that keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: &str, value: impl ToString) {
        self.pairs.push((key.to_string(), value.to_string()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Serialize parameters as `k=v` pairs joined by `&`, URL-encoding each value.
pub fn build_query(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex HMAC-SHA256 of `query` keyed with `secret`.
pub fn sign(query: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Current Unix time in milliseconds.
pub fn timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Stamp `params` with the current timestamp and return `query&signature=<sig>`.
pub fn signed_query(mut params: Params, secret: &str) -> String {
    params.push("timestamp", timestamp_ms());
    let query = build_query(&params);
    let signature = sign(&query, secret);
    format!("{}&signature={}", query, signature)
}
