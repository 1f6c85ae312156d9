// ===============================
// src/robinhood.rs
// ===============================
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::broker::BrokerError;

pub const DEFAULT_BASE_URL: &str = "https://api.robinhood.com/";

/// Endpoint table. Built once from the base URL and never mutated.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub login: Url,
    pub accounts: Url,
    pub instruments: Url,
    pub quotes: Url,
    pub orders: Url,
    pub markets: Url,
    // reserved: account / profile access not used by the loop yet
    #[allow(dead_code)]
    pub user: Url,
    #[allow(dead_code)]
    pub investment_profile: Url,
    #[allow(dead_code)]
    pub dividends: Url,
    #[allow(dead_code)]
    pub watchlists: Url,
    #[allow(dead_code)]
    pub notifications: Url,
    #[allow(dead_code)]
    pub documents: Url,
}

impl Endpoints {
    pub fn new(base: &str) -> Result<Self, url::ParseError> {
        // join() drops the last path segment unless the base ends with '/'
        let base = if base.ends_with('/') { Url::parse(base)? } else { Url::parse(&format!("{base}/"))? };
        let at = |p: &str| base.join(p);
        Ok(Self {
            login: at("api-token-auth/")?,
            accounts: at("accounts/")?,
            instruments: at("instruments/")?,
            quotes: at("quotes/")?,
            orders: at("orders/")?,
            markets: at("markets/")?,
            user: at("user/")?,
            investment_profile: at("user/investment_profile/")?,
            dividends: at("dividends/")?,
            watchlists: at("watchlists/")?,
            notifications: at("notifications/")?,
            documents: at("documents/")?,
        })
    }
}

pub fn default_headers() -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(ACCEPT, HeaderValue::from_static("*/*"));
    h.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en;q=1, fr;q=0.9, de;q=0.8, ja;q=0.7, nl;q=0.6, it;q=0.5"),
    );
    h.insert("x-robinhood-api-version", HeaderValue::from_static("1.0.0"));
    h.insert(USER_AGENT, HeaderValue::from_static("Robinhood/823 (iPhone; iOS 7.1.2; Scale/2.00)"));
    h
}

// ---- Response envelopes ----
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
}

/// `non_field_errors` joined, if the payload carries any.
pub fn field_errors(v: &Value) -> Option<String> {
    let errs = v.get("non_field_errors")?;
    let joined = match errs {
        Value::Array(items) => items
            .iter()
            .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    Some(joined)
}

/// Token from a login payload; field errors (or no token) are an auth failure.
pub fn parse_login(v: &Value) -> Result<String, BrokerError> {
    if let Some(errs) = field_errors(v) {
        return Err(BrokerError::Auth(errs));
    }
    v.get("token")
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| BrokerError::Auth("login response has no token".into()))
}

pub fn auth_header(token: &str) -> String {
    format!("Token {token}")
}

/// Account / instrument links come back percent-encoded in places.
pub fn unquote(link: &str) -> String {
    urlencoding::decode(link).map(|s| s.into_owned()).unwrap_or_else(|_| link.to_string())
}
