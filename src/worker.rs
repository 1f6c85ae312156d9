// ===============================
// src/worker.rs
// ===============================
use ahash::AHashMap as HashMap;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::broker::{BrokerApi, BrokerError, BrokerSession};
use crate::domain::{Instrument, Market, OrderRecord};
use crate::metrics::{DECISIONS, ORDERS};
use crate::robinhood::unquote;
use crate::state::{Observation, StateSnapshot};

/// Owns the broker session. Builds a fresh snapshot per tick and executes decisions.
pub struct Worker<B> {
    session: BrokerSession<B>,
    symbols: Vec<String>,
    // symbol -> instrument, market url -> market (both stable within a run)
    instruments: HashMap<String, Instrument>,
    markets: HashMap<String, Market>,
}

impl<B: BrokerApi> Worker<B> {
    pub fn new(session: BrokerSession<B>, symbols: Vec<String>) -> Self {
        let symbols = symbols.into_iter().map(|s| s.to_ascii_uppercase()).collect();
        Self { session, symbols, instruments: HashMap::new(), markets: HashMap::new() }
    }

    pub fn session(&self) -> &BrokerSession<B> {
        &self.session
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub async fn refresh_state(&mut self) -> Result<StateSnapshot, BrokerError> {
        for sym in &self.symbols {
            if self.instruments.contains_key(sym) {
                continue;
            }
            match self.session.query_instrument(sym).await? {
                Some(inst) => {
                    debug!(symbol = %sym, url = %inst.url, "instrument resolved");
                    self.instruments.insert(sym.clone(), inst);
                }
                None => warn!(symbol = %sym, "symbol does not resolve to one instrument, skipping"),
            }
        }

        let resolved: Vec<String> =
            self.symbols.iter().filter(|s| self.instruments.contains_key(*s)).cloned().collect();

        for sym in &resolved {
            let url = self.instruments[sym].market.clone();
            if url.is_empty() || self.markets.contains_key(&url) {
                continue;
            }
            let market = self.session.market(&url).await?;
            self.markets.insert(url, market);
        }

        let quotes = if resolved.is_empty() { Vec::new() } else { self.session.quotes(&resolved).await? };
        let positions = self.session.positions().await?;

        let now = Utc::now();
        let observations = resolved
            .iter()
            .map(|sym| {
                let inst = &self.instruments[sym];
                let inst_url = unquote(&inst.url);
                Observation {
                    symbol: sym.clone(),
                    instrument: inst.clone(),
                    market: self.markets.get(&inst.market).cloned(),
                    quote: quotes.iter().find(|q| q.symbol.eq_ignore_ascii_case(sym)).cloned(),
                    position: positions.iter().find(|p| unquote(&p.instrument) == inst_url).cloned(),
                    observed_at: now,
                }
            })
            .collect::<Vec<_>>();

        info!(observations = observations.len(), positions = positions.len(), "state refreshed");
        Ok(StateSnapshot::new(self.session.default_account().cloned(), observations))
    }

    /// Act on the snapshot's decision at most once. No decision or already acted -> nothing.
    pub async fn perform_decision(
        &self,
        state: &mut StateSnapshot,
    ) -> Result<Option<OrderRecord>, BrokerError> {
        let Some(decision) = state.decision_mut() else {
            DECISIONS.with_label_values(&["none"]).inc();
            debug!("no decision this tick");
            return Ok(None);
        };
        if decision.is_acted() {
            debug!(kind = decision.kind().as_str(), "decision already acted on");
            return Ok(None);
        }
        DECISIONS.with_label_values(&[decision.kind().as_str()]).inc();

        let record = match decision.order() {
            None => None,
            Some((side, intent)) => {
                let res = self
                    .session
                    .place_order(side, &intent.symbol, intent.bid_price, intent.quantity)
                    .await;
                let status = if res.is_ok() { "placed" } else { "failed" };
                ORDERS.with_label_values(&[side.as_str(), status]).inc();
                Some(res?)
            }
        };
        decision.set_acted();
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockBroker;
    use crate::state::Decision;

    async fn worker(symbols: &[&str]) -> Worker<MockBroker> {
        let syms: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        let session = BrokerSession::start(MockBroker::new(&syms).with_walk(false), "u", "p")
            .await
            .unwrap();
        Worker::new(session, syms)
    }

    #[tokio::test]
    async fn refresh_builds_observations() {
        let mut w = worker(&["aapl", "msft"]).await;
        let st = w.refresh_state().await.unwrap();
        assert_eq!(st.observations.len(), 2);
        let o = st.observation("AAPL").unwrap();
        assert_eq!(o.quote.as_ref().unwrap().bid_price, Some(100.0));
        assert_eq!(o.market.as_ref().unwrap().mic, "XNAS");
        assert!(o.position.is_none());
        assert!(st.decision().is_none());
        assert!(st.account.is_some());
    }

    #[tokio::test]
    async fn unknown_symbols_are_skipped() {
        let session = BrokerSession::start(MockBroker::new(&["AAPL".to_string()]), "u", "p")
            .await
            .unwrap();
        let mut w = Worker::new(session, vec!["AAPL".into(), "NOPE".into()]);
        let st = w.refresh_state().await.unwrap();
        assert_eq!(st.observations.len(), 1);
        assert!(st.observation("NOPE").is_none());
    }

    #[tokio::test]
    async fn positions_show_up_after_fill() {
        let mut w = worker(&["AAPL"]).await;
        let mut st = w.refresh_state().await.unwrap();
        st.set_decision(Decision::buy("AAPL", None, 4));
        w.perform_decision(&mut st).await.unwrap();

        let st = w.refresh_state().await.unwrap();
        let pos = st.observation("AAPL").unwrap().position.as_ref().unwrap();
        assert_eq!(pos.quantity, Some(4.0));
    }

    #[tokio::test]
    async fn acts_at_most_once() {
        let mut w = worker(&["AAPL"]).await;
        let mut st = w.refresh_state().await.unwrap();
        st.set_decision(Decision::buy("AAPL", Some(99.0), 1));

        assert!(w.perform_decision(&mut st).await.unwrap().is_some());
        assert!(w.perform_decision(&mut st).await.unwrap().is_none());
        assert!(st.decision().unwrap().is_acted());
        assert_eq!(w.session().api().orders_submitted(), 1);
    }

    #[tokio::test]
    async fn stay_and_none_place_nothing() {
        let mut w = worker(&["AAPL"]).await;
        let mut st = w.refresh_state().await.unwrap();
        assert!(w.perform_decision(&mut st).await.unwrap().is_none());

        st.set_decision(Decision::stay());
        assert!(w.perform_decision(&mut st).await.unwrap().is_none());
        assert!(st.decision().unwrap().is_acted());
        assert_eq!(w.session().api().orders_submitted(), 0);
    }

    #[tokio::test]
    async fn failed_order_leaves_decision_unacted() {
        let mut w = worker(&["AAPL"]).await;
        let mut st = w.refresh_state().await.unwrap();
        st.set_decision(Decision::sell("TSLA", None, 1));
        assert!(matches!(w.perform_decision(&mut st).await, Err(BrokerError::Order(_))));
        assert!(!st.decision().unwrap().is_acted());
    }
}
