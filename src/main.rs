mod db;
mod ipc;
mod ledger;
mod logging;
mod schedule;
mod setup;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

const WORKSPACE_ENV: &str = "SCHOOLD_WORKSPACE";

fn main() {
    logging::init();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "schoold starting");

    let mut state = ipc::AppState::default();
    if let Ok(path) = std::env::var(WORKSPACE_ENV) {
        if !path.trim().is_empty() {
            // A bad startup workspace is not fatal; the UI can select another.
            if let Err(e) = ipc::select_workspace(&mut state, &PathBuf::from(path.trim())) {
                tracing::warn!(error = %e, "could not open {}", WORKSPACE_ENV);
            }
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparseable request line");
                ipc::bad_json(e.to_string())
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    tracing::info!("stdin closed, exiting");
}
