//! Live Stream Fan-out (§4.10, C10, §6.2 `GET /stream`).
//!
//! One SSE connection per browser session, multiplexing the bus's
//! `results` and `chunks` streams starting at `$` (latest). No
//! server-side filtering by run — the browser filters by `run_id`
//! itself (§4.10 "No per-run filtering on the server").

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::api::routes::AppState;

const BLOCK_MS: u64 = 5_000;
const HEARTBEAT_EVERY: Duration = Duration::from_secs(30);
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// `GET /stream`.
pub async fn stream(
    State(app_state): State<AppState>,
) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(128);
    tokio::spawn(fan_out(app_state, tx));
    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(HEARTBEAT_EVERY))
}

async fn fan_out(app_state: AppState, tx: mpsc::Sender<Result<Event, Infallible>>) {
    let bus = app_state.bus;
    let mut last_result_id = "$".to_string();
    let mut last_chunk_id = "$".to_string();
    let mut consecutive_errors = 0u32;

    loop {
        let results_fut = bus.read_results(&last_result_id, BLOCK_MS);
        let chunks_fut = bus.read_chunks(&last_chunk_id, BLOCK_MS);
        let (results, chunks) = tokio::join!(results_fut, chunks_fut);

        let mut had_error = false;

        match results {
            Ok(entries) => {
                for entry in entries {
                    last_result_id = entry.id;
                    let payload = serde_json::to_string(&entry.payload).unwrap_or_default();
                    if tx.send(Ok(Event::default().event("result").data(payload))).await.is_err() {
                        return;
                    }
                }
            }
            Err(_) => had_error = true,
        }

        match chunks {
            Ok(entries) => {
                for entry in entries {
                    last_chunk_id = entry.id;
                    let payload = serde_json::to_string(&entry.payload).unwrap_or_default();
                    if tx.send(Ok(Event::default().event("chunk").data(payload))).await.is_err() {
                        return;
                    }
                }
            }
            Err(_) => had_error = true,
        }

        if had_error {
            consecutive_errors += 1;
            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                return;
            }
        } else {
            consecutive_errors = 0;
        }
    }
}
