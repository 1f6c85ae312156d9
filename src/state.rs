// ===============================
// src/state.rs
// ===============================
//
// Snapshot of everything the brain sees on one tick, plus the single
// decision it may take for that tick.
//
// Decision lifecycle per snapshot:
//   (none) -> stay | buy | sell   (once)
//          -> acted               (set by the worker after executing)
// A new tick always starts from a fresh snapshot with no decision.
//
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{Account, Instrument, Market, Position, Quote, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind { Stay, Buy, Sell }
impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self { DecisionKind::Stay => "stay", DecisionKind::Buy => "buy", DecisionKind::Sell => "sell" }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderIntent {
    pub symbol: String,
    /// `None` = resolve from the latest quote when the order is placed.
    pub bid_price: Option<f64>,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Stand {
    Stay,
    Buy(OrderIntent),
    Sell(OrderIntent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    stand: Stand,
    acted_on: bool,
}

impl Decision {
    pub fn stay() -> Self { Self { stand: Stand::Stay, acted_on: false } }

    pub fn buy(symbol: impl Into<String>, bid_price: Option<f64>, quantity: u32) -> Self {
        Self {
            stand: Stand::Buy(OrderIntent { symbol: symbol.into(), bid_price, quantity }),
            acted_on: false,
        }
    }

    pub fn sell(symbol: impl Into<String>, bid_price: Option<f64>, quantity: u32) -> Self {
        Self {
            stand: Stand::Sell(OrderIntent { symbol: symbol.into(), bid_price, quantity }),
            acted_on: false,
        }
    }

    pub fn kind(&self) -> DecisionKind {
        match self.stand {
            Stand::Stay => DecisionKind::Stay,
            Stand::Buy(_) => DecisionKind::Buy,
            Stand::Sell(_) => DecisionKind::Sell,
        }
    }

    /// Side + intent for decisions that trade; `None` for stay.
    pub fn order(&self) -> Option<(Side, &OrderIntent)> {
        match &self.stand {
            Stand::Stay => None,
            Stand::Buy(i) => Some((Side::Buy, i)),
            Stand::Sell(i) => Some((Side::Sell, i)),
        }
    }

    pub fn symbol(&self) -> Option<&str> { self.order().map(|(_, i)| i.symbol.as_str()) }
    pub fn bid_price(&self) -> Option<f64> { self.order().and_then(|(_, i)| i.bid_price) }
    pub fn quantity(&self) -> Option<u32> { self.order().map(|(_, i)| i.quantity) }

    pub fn is_acted(&self) -> bool { self.acted_on }

    pub fn set_acted(&mut self) {
        info!(
            kind = self.kind().as_str(),
            symbol = ?self.symbol(),
            bid_price = ?self.bid_price(),
            quantity = ?self.quantity(),
            "decision acted on"
        );
        self.acted_on = true;
    }
}

/// One instrument as seen on one tick.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub symbol: String,
    pub instrument: Instrument,
    pub market: Option<Market>,
    pub quote: Option<Quote>,
    pub position: Option<Position>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub ts: DateTime<Utc>,
    pub account: Option<Account>,
    pub observations: Vec<Observation>,
    decision: Option<Decision>,
}

impl StateSnapshot {
    pub fn new(account: Option<Account>, observations: Vec<Observation>) -> Self {
        Self { ts: Utc::now(), account, observations, decision: None }
    }

    pub fn observation(&self, symbol: &str) -> Option<&Observation> {
        self.observations.iter().find(|o| o.symbol.eq_ignore_ascii_case(symbol))
    }

    pub fn decision(&self) -> Option<&Decision> { self.decision.as_ref() }

    pub(crate) fn decision_mut(&mut self) -> Option<&mut Decision> { self.decision.as_mut() }

    /// Write-once. Returns false (and keeps the first decision) if one was already made.
    pub fn set_decision(&mut self, decision: Decision) -> bool {
        if let Some(prev) = &self.decision {
            warn!(
                existing = prev.kind().as_str(),
                dropped = decision.kind().as_str(),
                "decision has already been made"
            );
            return false;
        }
        self.decision = Some(decision);
        true
    }
}
