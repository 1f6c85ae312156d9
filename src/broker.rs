// ===============================
// src/broker.rs
// ===============================
//
// Broker seam:
// - BrokerApi     : transport-level calls (one method per REST resource).
//                   Implemented by gateway_robinhood (HTTP) and gateway (mock).
// - BrokerSession : logged-in session on top of any BrokerApi. Holds the
//                   accounts and implements instrument lookup + order placement.
//
use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Account, Instrument, Market, OrderRecord, OrderRequest, Position, Quote, Side};
use crate::robinhood::unquote;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("login failed: {0}")]
    Auth(String),
    #[error("unable to place order: {0}")]
    Order(String),
    #[error("broker rejected request: {0}")]
    Api(String),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("login returned no accounts")]
    NoAccount,
    #[error("not logged in")]
    NotLoggedIn,
}

#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// On success the token is kept and sent on every later call.
    async fn login(&mut self, username: &str, password: &str) -> Result<String, BrokerError>;
    fn auth_token(&self) -> Option<&str>;

    async fn accounts(&self) -> Result<Vec<Account>, BrokerError>;
    async fn positions(&self, account: &Account) -> Result<Vec<Position>, BrokerError>;
    async fn instruments(&self, query: &str) -> Result<Vec<Instrument>, BrokerError>;
    async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, BrokerError>;
    async fn market(&self, url: &str) -> Result<Market, BrokerError>;
    async fn submit_order(&self, req: &OrderRequest) -> Result<OrderRecord, BrokerError>;
}

/// Exactly one result whose symbol equals `symbol` (case-insensitive), else none.
pub fn select_exact(results: Vec<Instrument>, symbol: &str) -> Option<Instrument> {
    let want = symbol.to_ascii_uppercase();
    let mut hits = results.into_iter().filter(|i| i.symbol == want);
    match (hits.next(), hits.next()) {
        (Some(one), None) => Some(one),
        _ => None,
    }
}

pub struct BrokerSession<B> {
    api: B,
    accounts: HashMap<String, Account>,
    default_account: String,
}

impl<B: BrokerApi> BrokerSession<B> {
    /// Log in, then load accounts. The first account returned becomes the default.
    pub async fn start(mut api: B, username: &str, password: &str) -> Result<Self, BrokerError> {
        api.login(username, password).await?;
        let list = api.accounts().await?;
        let default_account = list.first().ok_or(BrokerError::NoAccount)?.account_number.clone();
        let accounts: HashMap<String, Account> =
            list.into_iter().map(|a| (a.account_number.clone(), a)).collect();
        info!(accounts = accounts.len(), default = %default_account, "broker session started");
        Ok(Self { api, accounts, default_account })
    }

    pub fn api(&self) -> &B { &self.api }

    pub fn account(&self, number: &str) -> Option<&Account> { self.accounts.get(number) }

    pub fn default_account(&self) -> Option<&Account> { self.accounts.get(&self.default_account) }

    fn require_account(&self) -> Result<&Account, BrokerError> {
        self.default_account().ok_or(BrokerError::NoAccount)
    }

    pub async fn positions(&self) -> Result<Vec<Position>, BrokerError> {
        let acct = self.require_account()?;
        self.api.positions(acct).await
    }

    /// Fuzzy search: everything the broker returns for the query.
    pub async fn query_instruments(&self, query: &str) -> Result<Vec<Instrument>, BrokerError> {
        self.api.instruments(&query.to_ascii_uppercase()).await
    }

    /// Exact lookup. Zero or several matches -> `None`.
    pub async fn query_instrument(&self, symbol: &str) -> Result<Option<Instrument>, BrokerError> {
        let results = self.query_instruments(symbol).await?;
        let found = select_exact(results, symbol);
        if found.is_none() {
            debug!(%symbol, "no exact instrument match");
        }
        Ok(found)
    }

    pub async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, BrokerError> {
        self.api.quotes(symbols).await
    }

    pub async fn market(&self, url: &str) -> Result<Market, BrokerError> {
        self.api.market(url).await
    }

    /// Market order, good-for-day. `bid_price: None` takes the current bid from the quote.
    pub async fn place_order(
        &self,
        side: Side,
        symbol: &str,
        bid_price: Option<f64>,
        quantity: u32,
    ) -> Result<OrderRecord, BrokerError> {
        // resolve before touching quotes/orders: a bad symbol never reaches the order endpoint
        let instrument = self
            .query_instrument(symbol)
            .await?
            .ok_or_else(|| BrokerError::Order(format!("symbol is not valid: {symbol}")))?;
        let account = self.require_account()?;

        let price = match bid_price {
            Some(p) => p,
            None => self
                .api
                .quotes(&[instrument.symbol.clone()])
                .await?
                .first()
                .and_then(|q| q.bid_price)
                .ok_or_else(|| BrokerError::Order(format!("no bid price for {symbol}")))?,
        };

        let req = OrderRequest {
            account: unquote(&account.url),
            instrument: unquote(&instrument.url),
            price,
            quantity,
            side,
            symbol: instrument.symbol.clone(),
            time_in_force: "gfd".into(),
            trigger: "immediate".into(),
            order_type: "market".into(),
        };
        let rec = self.api.submit_order(&req).await?;
        if rec.id.is_empty() {
            return Err(BrokerError::Order(format!("order response has no id: {req:?}")));
        }
        info!(id = %rec.id, side = side.as_str(), symbol = %req.symbol, price, quantity, "order placed");
        Ok(rec)
    }

    pub async fn place_buy_order(
        &self,
        symbol: &str,
        bid_price: Option<f64>,
        quantity: u32,
    ) -> Result<OrderRecord, BrokerError> {
        self.place_order(Side::Buy, symbol, bid_price, quantity).await
    }

    pub async fn place_sell_order(
        &self,
        symbol: &str,
        bid_price: Option<f64>,
        quantity: u32,
    ) -> Result<OrderRecord, BrokerError> {
        self.place_order(Side::Sell, symbol, bid_price, quantity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockBroker;

    fn inst(symbol: &str, url: &str) -> Instrument {
        Instrument { symbol: symbol.into(), url: url.into(), ..Default::default() }
    }

    async fn session(symbols: &[&str]) -> BrokerSession<MockBroker> {
        let syms: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        BrokerSession::start(MockBroker::new(&syms).with_walk(false), "u", "p").await.unwrap()
    }

    #[test]
    fn select_exact_needs_exactly_one() {
        assert!(select_exact(vec![], "AAPL").is_none());
        assert!(select_exact(vec![inst("AAP", "a"), inst("AAPL", "b")], "aapl").is_some());
        assert!(select_exact(vec![inst("AAPL", "a"), inst("AAPL", "b")], "AAPL").is_none());
    }

    #[tokio::test]
    async fn exact_query_returns_single_or_none() {
        let s = session(&["AAPL", "AAP"]).await;
        // fuzzy search sees both, exact mode picks one
        assert_eq!(s.query_instruments("aap").await.unwrap().len(), 2);
        assert_eq!(s.query_instrument("aapl").await.unwrap().unwrap().symbol, "AAPL");
        assert!(s.query_instrument("NFLX").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_listing_is_a_lookup_miss() {
        let api = MockBroker::new(&["AAPL".to_string()])
            .with_walk(false)
            .with_instrument(inst("AAPL", "mock://instruments/AAPL-2/"));
        let s = BrokerSession::start(api, "u", "p").await.unwrap();
        assert!(s.query_instrument("AAPL").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_watch_symbol_still_trades() {
        let syms = crate::config::parse_symbols("AAPL,MSFT,aapl");
        let s = BrokerSession::start(MockBroker::new(&syms).with_walk(false), "u", "p").await.unwrap();
        assert_eq!(s.query_instrument("AAPL").await.unwrap().unwrap().symbol, "AAPL");
        s.place_buy_order("AAPL", None, 1).await.unwrap();
        assert_eq!(s.api().orders_submitted(), 1);
    }

    #[tokio::test]
    async fn unknown_symbol_fails_before_order_call() {
        let s = session(&["AAPL"]).await;
        let err = s.place_buy_order("ZZZZ", None, 1).await.unwrap_err();
        assert!(matches!(err, BrokerError::Order(_)));
        assert_eq!(s.api().orders_submitted(), 0);
        assert_eq!(s.api().quote_calls(), 0);
    }

    #[tokio::test]
    async fn missing_bid_price_comes_from_quote() {
        let s = session(&["AAPL"]).await;
        let rec = s.place_sell_order("aapl", None, 2).await.unwrap();
        assert!(!rec.id.is_empty());
        let sent = s.api().last_order().unwrap();
        assert_eq!(sent.price, 100.0);
        assert_eq!(sent.side, Side::Sell);
        assert_eq!(sent.symbol, "AAPL");
        assert_eq!(sent.time_in_force, "gfd");
        assert_eq!(sent.trigger, "immediate");
        assert_eq!(sent.order_type, "market");
        assert_eq!(sent.account, s.default_account().unwrap().url);
    }

    #[tokio::test]
    async fn explicit_bid_price_skips_quote() {
        let s = session(&["AAPL"]).await;
        s.place_buy_order("AAPL", Some(42.5), 1).await.unwrap();
        assert_eq!(s.api().last_order().unwrap().price, 42.5);
        assert_eq!(s.api().quote_calls(), 0);
    }

    #[tokio::test]
    async fn bad_credentials_never_start_a_session() {
        let api = MockBroker::new(&["AAPL".to_string()]).with_credentials("alice", "secret");
        let res = BrokerSession::start(api, "alice", "wrong").await;
        assert!(matches!(res, Err(BrokerError::Auth(_))));
    }

    #[tokio::test]
    async fn default_account_is_first() {
        let s = session(&["AAPL"]).await;
        let acct = s.default_account().unwrap();
        assert_eq!(s.account(&acct.account_number).unwrap().url, acct.url);
    }
}
