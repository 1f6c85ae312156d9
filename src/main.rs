// ===============================
// src/main.rs
// ===============================
/*
 # paper trading against the mock venue, two ticks then exit
 SYMBOLS=AAPL,MSFT BRAIN=hold cargo run -- --log --ticks 2

 # live session (Enter stops the loop)
 VENUE_MODE=robinhood ROBINHOOD_USERNAME=... ROBINHOOD_PASSWORD=... cargo run -- --dots

 curl -s localhost:9899/metrics | egrep '^(ticks_total|decisions_total|orders_total)'
*/
/*
=============================================================================
Project : little_john: polling trading loop for a Robinhood-style broker
Module  : main.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Logs into the broker, polls account / quote / position state on a
          fixed interval, lets a pluggable brain decide buy / sell / stay and
          executes the decision at most once per tick. Exposes Prometheus
          metrics and records JSONL state history.
=============================================================================
*/
mod domain;
mod config;
mod metrics;
mod recorder;
mod state;
mod brain;
mod broker;
mod robinhood;          // endpoint table, headers, payload helpers
mod gateway;            // mock broker (paper fills)
mod gateway_robinhood;  // real Robinhood REST client
mod worker;
mod control;

use std::error::Error;

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    select,
    sync::{mpsc, watch},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::broker::{BrokerApi, BrokerSession};
use crate::config::{Args, VenueMode};
use crate::control::ControlLoop;
use crate::domain::Event;
use crate::worker::Worker;

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = config::load();

    // ---- Logging ----
    let default_level = if args.log { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        venue_mode = args.venue_mode.as_str(),
        brain = args.brain.as_str(),
        symbols = ?args.symbols,
        tick_ms = args.tick_interval.as_millis() as u64,
        robinhood = %args.robinhood_url,
        "startup config"
    );
    metrics::CONFIG_VENUE_MODE.with_label_values(&[args.venue_mode.as_str()]).set(1);
    metrics::CONFIG_BRAIN.with_label_values(&[args.brain.as_str()]).set(1);
    for s in &args.symbols {
        metrics::CONFIG_SYMBOL.with_label_values(&[s.as_str()]).set(1);
    }

    // ---- Recorder (optional) ----
    let (rec_tx, rec_task) = match args.record_file.clone() {
        Some(path) => {
            let (tx, rx) = mpsc::channel::<Event>(1024);
            (Some(tx), Some(tokio::spawn(recorder::run(rx, path))))
        }
        None => (None, None),
    };

    // ---- Broker ----
    let res = match args.venue_mode {
        VenueMode::Mock => {
            let api = gateway::MockBroker::new(&args.symbols);
            run(api, &args, rec_tx).await
        }
        VenueMode::Robinhood => {
            let endpoints = robinhood::Endpoints::new(&args.robinhood_url)?;
            let api = gateway_robinhood::RobinhoodClient::new(endpoints, args.http_timeout)?;
            run(api, &args, rec_tx).await
        }
    };

    // the loop owned the last sender; let the recorder drain and flush
    if let Some(task) = rec_task {
        let _ = task.await;
    }
    res
}

async fn run<B: BrokerApi + 'static>(
    api: B,
    args: &Args,
    rec_tx: Option<mpsc::Sender<Event>>,
) -> Result<(), BoxError> {
    // login failure aborts startup
    let (username, password) = args.credentials()?;
    let session = BrokerSession::start(api, &username, &password).await?;

    let worker = Worker::new(session, args.symbols.clone());
    let mut lp = ControlLoop::new(worker, brain::from_mode(&args.brain), args.tick_interval)
        .with_dots(args.dots)
        .with_recorder(rec_tx);

    if let Some(n) = args.ticks {
        let ok = lp.run_ticks(n).await;
        info!(ticks = n, ok, "done");
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(lp.run(stop_rx));

    println!("Running...\nPress 'Enter' to stop.");
    select! {
        _ = enter_pressed(tokio::io::stdin()) => {},
        _ = tokio::signal::ctrl_c() => {},
    }
    println!("Quitting...");
    let _ = stop_tx.send(true);

    // the in-flight tick (if any) finishes first
    let lp = handle.await?;
    info!(ticks = lp.ticks(), "stopped");
    Ok(())
}

/// Resolves on a line from stdin. A closed stdin (nohup, </dev/null) never
/// resolves, which leaves Ctrl-C as the only way out.
async fn enter_pressed<R: AsyncRead + Unpin>(input: R) {
    let mut lines = BufReader::new(input).lines();
    match lines.next_line().await {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!("stdin closed, press Ctrl-C to stop");
            std::future::pending::<()>().await
        }
        Err(e) => {
            warn!(?e, "stdin read failed, press Ctrl-C to stop");
            std::future::pending::<()>().await
        }
    }
}
