mod db;
mod ipc;
mod stats;
mod window;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

fn main() {
    env_logger::init();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    // The host usually drives workspace.select over the pipe; the env var
    // exists for running the sidecar standalone.
    if let Ok(path) = std::env::var("ROLLCALLD_WORKSPACE") {
        let path = path.trim().to_string();
        if !path.is_empty() {
            match db::open_db(std::path::Path::new(&path)) {
                Ok(conn) => {
                    log::info!("workspace preselected from ROLLCALLD_WORKSPACE: {}", path);
                    state.workspace = Some(PathBuf::from(&path));
                    state.db = Some(conn);
                }
                Err(e) => log::warn!("ROLLCALLD_WORKSPACE not usable: {:?}", e),
            }
        }
    }

    log::info!("rollcalld {} ready", env!("CARGO_PKG_VERSION"));

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id; ignore.
                log::warn!("unparseable request line: {}", e);
                let _ = writeln!(
                    stdout,
                    "{{\"ok\":false,\"error\":{{\"code\":\"bad_json\",\"message\":\"{}\"}}}}",
                    e
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let method = req.method.clone();
        let resp = ipc::handle_request(&mut state, req);
        log::debug!(
            "{} -> {}",
            method,
            if resp.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
                "ok"
            } else {
                "err"
            }
        );
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
