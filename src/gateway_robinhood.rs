// ===============================
// src/gateway_robinhood.rs
// ===============================
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use crate::broker::{BrokerApi, BrokerError};
use crate::domain::{Account, Instrument, Market, OrderRecord, OrderRequest, Position, Quote};
use crate::robinhood::{auth_header, default_headers, field_errors, parse_login, Endpoints, Page};

/// Robinhood REST client. Endpoints are fixed at construction; the only
/// state that changes afterwards is the auth token set by `login`.
pub struct RobinhoodClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    token: Option<String>,
}

impl RobinhoodClient {
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self, BrokerError> {
        let http = reqwest::Client::builder()
            .default_headers(default_headers())
            .timeout(timeout)
            .build()?;
        Ok(Self { http, endpoints, token: None })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Install the token from a login payload. Leaves the client untouched on failure.
    pub fn apply_login(&mut self, payload: &Value) -> Result<String, BrokerError> {
        let token = parse_login(payload)?;
        self.token = Some(token.clone());
        Ok(token)
    }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => rb.header(AUTHORIZATION, auth_header(t)),
            None => rb,
        }
    }

    async fn send(&self, rb: RequestBuilder) -> Result<Value, BrokerError> {
        let rsp = self.authed(rb).send().await?;
        let status = rsp.status();
        let body = rsp.json::<Value>().await?;
        if let Some(errs) = field_errors(&body) {
            error!(%status, errors = %errs, "broker returned field errors");
            return Err(BrokerError::Api(errs));
        }
        if !status.is_success() {
            return Err(BrokerError::Api(format!("{status}: {body}")));
        }
        Ok(body)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, params: &[(&str, String)]) -> Result<T, BrokerError> {
        debug!(%url, ?params, "GET");
        let v = self.send(self.http.get(url).query(params)).await?;
        Ok(serde_json::from_value(v)?)
    }
}

#[async_trait]
impl BrokerApi for RobinhoodClient {
    async fn login(&mut self, username: &str, password: &str) -> Result<String, BrokerError> {
        let form = [("username", username), ("password", password)];
        let rsp = self.http.post(self.endpoints.login.clone()).form(&form).send().await?;
        // login errors arrive as non_field_errors with a 400; parse_login reads them either way
        let payload = rsp.json::<Value>().await?;
        self.apply_login(&payload)
    }

    fn auth_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    async fn accounts(&self) -> Result<Vec<Account>, BrokerError> {
        let page: Page<Account> = self.get(self.endpoints.accounts.as_str(), &[]).await?;
        Ok(page.results)
    }

    async fn positions(&self, account: &Account) -> Result<Vec<Position>, BrokerError> {
        let page: Page<Position> = self.get(&account.positions, &[]).await?;
        Ok(page.results)
    }

    async fn instruments(&self, query: &str) -> Result<Vec<Instrument>, BrokerError> {
        let page: Page<Instrument> = self
            .get(self.endpoints.instruments.as_str(), &[("query", query.to_ascii_uppercase())])
            .await?;
        Ok(page.results)
    }

    async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, BrokerError> {
        let page: Page<Quote> =
            self.get(self.endpoints.quotes.as_str(), &[("symbols", symbols.join(","))]).await?;
        Ok(page.results)
    }

    async fn market(&self, url: &str) -> Result<Market, BrokerError> {
        self.get(url, &[]).await
    }

    async fn submit_order(&self, req: &OrderRequest) -> Result<OrderRecord, BrokerError> {
        if self.token.is_none() {
            return Err(BrokerError::NotLoggedIn);
        }
        let rb = self.http.post(self.endpoints.orders.clone()).form(req);
        match self.send(rb).await {
            Ok(v) => Ok(serde_json::from_value(v)?),
            Err(BrokerError::Api(errs)) => Err(BrokerError::Order(format!("{req:?} | errors: {errs}"))),
            Err(e) => Err(e),
        }
    }
}
