// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{error, info};

// Single custom registry (everything is registered here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Control loop --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "control loop ticks started").unwrap());

pub static TICK_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tick_errors_total", "ticks abandoned, by failing step"),
        &["step"],
    )
    .unwrap()
});

pub static TICK_MS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("tick_duration_ms", "refresh + decide + act time per tick (ms)")
            .buckets(vec![10.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0]),
    )
    .unwrap()
});

// -------- Decisions & orders --------
pub static DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("decisions_total", "decisions seen by the worker (kind: none|stay|buy|sell)"),
        &["kind"],
    )
    .unwrap()
});

pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_total", "order placements (status: placed|failed)"),
        &["side", "status"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_VENUE_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_venue_mode", "venue mode (label: mode)"), &["mode"]).unwrap()
});

pub static CONFIG_BRAIN: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_brain", "active brain (label: brain)"), &["brain"]).unwrap()
});

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_symbol", "watched symbols (label: symbol)"), &["symbol"])
        .unwrap()
});

pub fn init() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(TICKS.clone()),
        Box::new(TICK_ERRORS.clone()),
        Box::new(TICK_MS.clone()),
        Box::new(DECISIONS.clone()),
        Box::new(ORDERS.clone()),
        Box::new(CONFIG_VENUE_MODE.clone()),
        Box::new(CONFIG_BRAIN.clone()),
        Box::new(CONFIG_SYMBOL.clone()),
    ];
    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            error!(?e, "metric registration failed");
        }
    }
}

fn encode_metrics() -> Vec<u8> {
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// tiny HTTP/1.1 responder: any request gets the metrics page
fn handle_client(mut stream: TcpStream) {
    let mut req_buf = [0u8; 1024];
    let _ = stream.read(&mut req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

/// Serve on a dedicated OS thread so the Tokio runtime only runs the loop.
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, ?e, "metrics bind failed, metrics disabled");
                return;
            }
        };
        info!(%addr, "metrics listening");
        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => error!(?e, "metrics accept error"),
            }
        }
    });
}
