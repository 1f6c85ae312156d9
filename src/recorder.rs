// ===============================
// src/recorder.rs
// ===============================
//
// State history as JSONL (one Event per line, append-only):
// - snapshots, placed orders and tick failures from the control loop
// - buffered; flushed every second and when the channel closes
// - a failed write reopens the file once before dropping the event
//
// ENV: `RECORD_FILE=/path/to/history.jsonl` turns it on (see main.rs).
//
use std::path::Path;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::Event;

async fn open_writer(path: &str) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &[u8]) -> std::io::Result<()> {
    writer.write_all(line).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, history disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut flush_tick = interval(Duration::from_secs(1));
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let line = match serde_json::to_vec(&ev) {
                    Ok(b) => b,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip event");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut writer, &line).await {
                    warn!(?e, "recorder: write failed, reopening");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e2) => {
                            error!(?e2, "recorder: reopen failed, history disabled");
                            return;
                        }
                    }
                    if let Err(e3) = write_line(&mut writer, &line).await {
                        error!(?e3, "recorder: write failed after reopen, drop event");
                    }
                }
            }
            _ = flush_tick.tick() => {
                let _ = writer.flush().await;
            }
        }
    }
}
