// ===============================
// src/gateway.rs (mock broker)
// ===============================
//
// In-memory paper broker:
// - quotes follow a random walk (a few cents per call) unless disabled
// - every order fills immediately at its price and updates the position
// - login accepts anything unless credentials were pinned
//
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;

use crate::broker::{BrokerApi, BrokerError};
use crate::domain::{Account, Instrument, Market, OrderRecord, OrderRequest, Position, Quote, Side};
use crate::robinhood::parse_login;

const ACCOUNT_NUMBER: &str = "MOCK0001";
const MARKET_URL: &str = "mock://markets/XNAS/";
const START_BID: f64 = 100.00;

#[derive(Default)]
struct Book {
    bids: HashMap<String, f64>,
    // keyed by instrument url
    positions: HashMap<String, f64>,
    orders: Vec<OrderRequest>,
}

pub struct MockBroker {
    credentials: Option<(String, String)>,
    token: Option<String>,
    instruments: Vec<Instrument>,
    walk: bool,
    fill_delay: Duration,
    book: Mutex<Book>,
    quotes_failing: AtomicBool,
    quote_calls: AtomicUsize,
}

impl MockBroker {
    pub fn new(symbols: &[String]) -> Self {
        let mut book = Book::default();
        let instruments = symbols
            .iter()
            .map(|s| s.to_ascii_uppercase())
            // one listing per symbol; a repeat would make exact lookup ambiguous
            .filter(|sym| book.bids.insert(sym.clone(), START_BID).is_none())
            .map(|sym| Instrument {
                url: format!("mock://instruments/{sym}/"),
                market: MARKET_URL.to_string(),
                name: Some(format!("{sym} (paper)")),
                tradeable: Some(true),
                symbol: sym,
                ..Default::default()
            })
            .collect();
        Self {
            credentials: None,
            token: None,
            instruments,
            walk: true,
            fill_delay: Duration::ZERO,
            book: Mutex::new(book),
            quotes_failing: AtomicBool::new(false),
            quote_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_walk(mut self, on: bool) -> Self {
        self.walk = on;
        self
    }

    /// Time an order spends in flight before it fills.
    pub fn with_fill_delay(mut self, delay: Duration) -> Self {
        self.fill_delay = delay;
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    /// Extra listing (e.g. a duplicate symbol) visible to instrument search.
    pub fn with_instrument(mut self, instrument: Instrument) -> Self {
        self.book.get_mut().unwrap_or_else(|e| e.into_inner())
            .bids
            .entry(instrument.symbol.clone())
            .or_insert(START_BID);
        self.instruments.push(instrument);
        self
    }

    pub fn set_quotes_failing(&self, on: bool) {
        self.quotes_failing.store(on, Ordering::SeqCst);
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn orders_submitted(&self) -> usize {
        self.lock().orders.len()
    }

    pub fn last_order(&self) -> Option<OrderRequest> {
        self.lock().orders.last().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn require_login(&self) -> Result<(), BrokerError> {
        self.token.as_ref().map(|_| ()).ok_or(BrokerError::NotLoggedIn)
    }

    fn account(&self) -> Account {
        Account {
            account_number: ACCOUNT_NUMBER.to_string(),
            url: format!("mock://accounts/{ACCOUNT_NUMBER}/"),
            positions: format!("mock://accounts/{ACCOUNT_NUMBER}/positions/"),
            ..Default::default()
        }
    }
}

#[async_trait]
impl BrokerApi for MockBroker {
    async fn login(&mut self, username: &str, password: &str) -> Result<String, BrokerError> {
        // same payload shapes as the real login endpoint
        let payload = match &self.credentials {
            Some((u, p)) if u != username || p != password => {
                json!({ "non_field_errors": ["Unable to log in with provided credentials."] })
            }
            _ => json!({ "token": format!("mock-{}", rand::thread_rng().gen::<u32>()) }),
        };
        let token = parse_login(&payload)?;
        self.token = Some(token.clone());
        Ok(token)
    }

    fn auth_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    async fn accounts(&self) -> Result<Vec<Account>, BrokerError> {
        self.require_login()?;
        Ok(vec![self.account()])
    }

    async fn positions(&self, _account: &Account) -> Result<Vec<Position>, BrokerError> {
        self.require_login()?;
        let book = self.lock();
        Ok(book
            .positions
            .iter()
            .map(|(url, qty)| Position { instrument: url.clone(), quantity: Some(*qty), ..Default::default() })
            .collect())
    }

    async fn instruments(&self, query: &str) -> Result<Vec<Instrument>, BrokerError> {
        let q = query.to_ascii_uppercase();
        Ok(self.instruments.iter().filter(|i| i.symbol.contains(&q)).cloned().collect())
    }

    async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, BrokerError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if self.quotes_failing.load(Ordering::SeqCst) {
            return Err(BrokerError::Api("quotes unavailable".into()));
        }
        let mut book = self.lock();
        let mut out = Vec::with_capacity(symbols.len());
        for s in symbols {
            let sym = s.to_ascii_uppercase();
            let Some(bid) = book.bids.get_mut(&sym) else { continue };
            if self.walk {
                let step = rand::thread_rng().gen_range(-3..=3) as f64 / 100.0;
                *bid = (*bid + step).max(1.0);
            }
            out.push(Quote {
                symbol: sym,
                bid_price: Some(*bid),
                ask_price: Some(*bid + 0.01),
                last_trade_price: Some(*bid),
                ..Default::default()
            });
        }
        Ok(out)
    }

    async fn market(&self, url: &str) -> Result<Market, BrokerError> {
        if url != MARKET_URL {
            return Err(BrokerError::Api(format!("unknown market {url}")));
        }
        Ok(Market {
            mic: "XNAS".into(),
            acronym: "NASDAQ".into(),
            name: "NASDAQ - All Markets".into(),
            timezone: "US/Eastern".into(),
            ..Default::default()
        })
    }

    async fn submit_order(&self, req: &OrderRequest) -> Result<OrderRecord, BrokerError> {
        self.require_login()?;
        if !self.fill_delay.is_zero() {
            tokio::time::sleep(self.fill_delay).await;
        }
        let mut book = self.lock();
        let signed = match req.side { Side::Buy => 1.0, Side::Sell => -1.0 } * req.quantity as f64;
        *book.positions.entry(req.instrument.clone()).or_insert(0.0) += signed;
        book.orders.push(req.clone());
        Ok(OrderRecord {
            id: format!("mock-order-{}", book.orders.len()),
            state: Some("filled".into()),
            side: Some(req.side.as_str().into()),
            price: Some(req.price),
            quantity: Some(req.quantity as f64),
            ..Default::default()
        })
    }
}
