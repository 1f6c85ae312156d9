// ===============================
// src/control.rs
// ===============================
//
// Control loop. One tick = refresh state -> brain decides -> worker acts,
// then wait one interval. The stop signal is only looked at between ticks:
// an in-flight tick always finishes, the wait is cut short.
//
use std::io::Write;

use chrono::Utc;
use thiserror::Error;
use tokio::{
    select,
    sync::{mpsc, watch},
    time::{sleep, Duration, Instant},
};
use tracing::{error, info};

use crate::brain::Brain;
use crate::broker::{BrokerApi, BrokerError};
use crate::domain::Event;
use crate::metrics::{TICKS, TICK_ERRORS, TICK_MS};
use crate::state::StateSnapshot;
use crate::worker::Worker;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);
const DOTS_NUM: u32 = 10;

#[derive(Debug, Error)]
pub enum TickError {
    #[error("refresh state: {0}")]
    Refresh(#[source] BrokerError),
    #[error("perform decision: {0}")]
    Perform(#[source] BrokerError),
}

impl TickError {
    pub fn step(&self) -> &'static str {
        match self {
            TickError::Refresh(_) => "refresh",
            TickError::Perform(_) => "perform",
        }
    }
}

pub struct ControlLoop<B> {
    worker: Worker<B>,
    brain: Box<dyn Brain>,
    interval: Duration,
    dots: bool,
    rec_tx: Option<mpsc::Sender<Event>>,
    ticks: u64,
}

impl<B: BrokerApi> ControlLoop<B> {
    pub fn new(worker: Worker<B>, brain: Box<dyn Brain>, interval: Duration) -> Self {
        Self { worker, brain, interval, dots: false, rec_tx: None, ticks: 0 }
    }

    /// Print a `[..........]` progress bar while waiting between ticks.
    pub fn with_dots(mut self, on: bool) -> Self {
        self.dots = on;
        self
    }

    pub fn with_recorder(mut self, rec_tx: Option<mpsc::Sender<Event>>) -> Self {
        self.rec_tx = rec_tx;
        self
    }

    pub fn worker(&self) -> &Worker<B> { &self.worker }
    pub fn ticks(&self) -> u64 { self.ticks }

    fn record(&self, ev: Event) {
        if let Some(tx) = &self.rec_tx {
            let _ = tx.try_send(ev);
        }
    }

    /// One full tick, without the wait.
    pub async fn tick(&mut self) -> Result<StateSnapshot, TickError> {
        self.ticks += 1;
        TICKS.inc();
        let started = Instant::now();

        let mut state = self.worker.refresh_state().await.map_err(TickError::Refresh)?;
        self.brain.update_decision(&mut state);
        let order = self.worker.perform_decision(&mut state).await;

        TICK_MS.observe(started.elapsed().as_secs_f64() * 1_000.0);
        self.record(Event::Snapshot(state.clone()));
        match order {
            Ok(Some(record)) => {
                let symbol = state.decision().and_then(|d| d.symbol()).unwrap_or_default().to_string();
                self.record(Event::Order { ts: Utc::now(), symbol, record });
            }
            Ok(None) => {}
            Err(e) => return Err(TickError::Perform(e)),
        }
        Ok(state)
    }

    async fn tick_logged(&mut self) -> bool {
        match self.tick().await {
            Ok(state) => {
                info!(
                    tick = self.ticks,
                    decision = state.decision().map(|d| d.kind().as_str()).unwrap_or("none"),
                    "tick done"
                );
                true
            }
            Err(e) => {
                // no retry: the next tick starts after the normal interval
                error!(tick = self.ticks, step = e.step(), error = %e, "tick failed");
                TICK_ERRORS.with_label_values(&[e.step()]).inc();
                self.record(Event::Note(format!("tick {} failed: {e}", self.ticks)));
                false
            }
        }
    }

    /// Exactly `n` ticks, each followed by the interval. Returns how many succeeded.
    pub async fn run_ticks(&mut self, n: usize) -> usize {
        let mut ok = 0;
        for _ in 0..n {
            if self.tick_logged().await {
                ok += 1;
            }
            sleep(self.interval).await;
        }
        ok
    }

    /// Tick until `stop` turns true. Hands the loop back once stopped.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Self {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            brain = self.brain.name(),
            symbols = ?self.worker.symbols(),
            "control loop started"
        );
        loop {
            if *stop.borrow() {
                break;
            }
            self.tick_logged().await;
            if self.wait(&mut stop).await {
                break;
            }
        }
        info!(ticks = self.ticks, "control loop stopped");
        self
    }

    /// Sleep one interval; true if stop was raised meanwhile.
    async fn wait(&self, stop: &mut watch::Receiver<bool>) -> bool {
        if !self.dots {
            return select! {
                _ = sleep(self.interval) => false,
                _ = stop_raised(stop) => true,
            };
        }

        let step = self.interval / DOTS_NUM;
        let mut out = std::io::stdout();
        let back = "\u{8}".repeat(DOTS_NUM as usize + 1);
        let _ = write!(out, "[{}]{}", " ".repeat(DOTS_NUM as usize), back);
        let _ = out.flush();
        let mut stopped = false;
        for _ in 0..DOTS_NUM {
            select! {
                _ = sleep(step) => {
                    let _ = write!(out, ".");
                    let _ = out.flush();
                }
                _ = stop_raised(stop) => {
                    stopped = true;
                    break;
                }
            }
        }
        let _ = write!(out, "\r");
        let _ = out.flush();
        stopped
    }
}

/// Resolves once the flag reads true. A dropped sender never stops the loop.
async fn stop_raised(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::IdleBrain;
    use crate::broker::BrokerSession;
    use crate::gateway::MockBroker;
    use crate::state::Decision;

    const T: Duration = Duration::from_secs(10);

    /// Buys one AAPL every tick.
    struct EagerBrain;
    impl Brain for EagerBrain {
        fn name(&self) -> &'static str { "eager" }
        fn update_decision(&self, state: &mut StateSnapshot) {
            state.set_decision(Decision::buy("AAPL", None, 1));
        }
    }

    async fn control(brain: Box<dyn Brain>) -> ControlLoop<MockBroker> {
        let syms = vec!["AAPL".to_string()];
        let session = BrokerSession::start(MockBroker::new(&syms).with_walk(false), "u", "p")
            .await
            .unwrap();
        ControlLoop::new(Worker::new(session, syms), brain, T)
    }

    fn orders(lp: &ControlLoop<MockBroker>) -> usize {
        lp.worker().session().api().orders_submitted()
    }

    #[tokio::test]
    async fn tick_runs_steps_in_order() {
        let mut lp = control(Box::new(EagerBrain)).await;
        let st = lp.tick().await.unwrap();
        assert!(st.decision().unwrap().is_acted());
        assert_eq!(orders(&lp), 1);
        assert_eq!(lp.ticks(), 1);
    }

    #[tokio::test]
    async fn idle_brain_never_trades() {
        let mut lp = control(Box::new(IdleBrain)).await;
        let st = lp.tick().await.unwrap();
        assert!(st.decision().is_none());
        assert_eq!(orders(&lp), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_tick_means_no_orders() {
        let lp = control(Box::new(EagerBrain)).await;
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let lp = lp.run(rx).await;
        assert_eq!(lp.ticks(), 0);
        assert_eq!(orders(&lp), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_wait_ends_after_current_tick() {
        let lp = control(Box::new(EagerBrain)).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(lp.run(rx));

        sleep(T + T / 2).await;
        tx.send(true).unwrap();
        let lp = handle.await.unwrap();
        assert_eq!(lp.ticks(), 2);
        assert_eq!(orders(&lp), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_tick_lets_the_tick_finish() {
        let syms = vec!["AAPL".to_string()];
        let api = MockBroker::new(&syms).with_walk(false).with_fill_delay(Duration::from_secs(3));
        let session = BrokerSession::start(api, "u", "p").await.unwrap();
        let (rec_tx, mut rec_rx) = mpsc::channel(8);
        let lp = ControlLoop::new(Worker::new(session, syms), Box::new(EagerBrain), T)
            .with_recorder(Some(rec_tx));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(lp.run(rx));

        // the order is still in flight here
        sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        let start = Instant::now();
        let lp = handle.await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < T);
        assert_eq!(lp.ticks(), 1);
        assert_eq!(orders(&lp), 1);
        match rec_rx.recv().await {
            Some(Event::Snapshot(st)) => assert!(st.decision().unwrap().is_acted()),
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert!(matches!(rec_rx.recv().await, Some(Event::Order { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn n_ticks_take_n_intervals() {
        let mut lp = control(Box::new(IdleBrain)).await;
        let start = Instant::now();
        assert_eq!(lp.run_ticks(3).await, 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= T * 3);
        assert!(elapsed < T * 3 + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn dots_wait_is_one_interval() {
        let mut lp = control(Box::new(IdleBrain)).await.with_dots(true);
        let start = Instant::now();
        let (_tx, mut rx) = watch::channel(false);
        assert!(!lp.wait(&mut rx).await);
        assert!(start.elapsed() >= T);
        lp.tick().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_tick_does_not_stop_the_loop() {
        let mut lp = control(Box::new(EagerBrain)).await;
        lp.worker().session().api().set_quotes_failing(true);
        assert_eq!(lp.run_ticks(2).await, 0);
        assert_eq!(orders(&lp), 0);

        lp.worker().session().api().set_quotes_failing(false);
        assert_eq!(lp.run_ticks(1).await, 1);
        assert_eq!(orders(&lp), 1);
        assert_eq!(lp.ticks(), 3);
    }

    #[tokio::test]
    async fn snapshots_go_to_recorder() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut lp = control(Box::new(EagerBrain)).await.with_recorder(Some(tx));
        lp.tick().await.unwrap();
        assert!(matches!(rx.recv().await, Some(Event::Snapshot(_))));
        assert!(matches!(rx.recv().await, Some(Event::Order { .. })));
    }
}
