//! Crash-loop protection: a daemon restarted too often waits before polling.
//!
//! Start times are kept in `daemon/daemon-backoff.json`. More than
//! [`MAX_STARTS`] starts within [`WINDOW_SECS`] delay startup by
//! [`STEP_SECS`] per extra start, capped at [`MAX_DELAY_SECS`].

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::warn;

const WINDOW_SECS: i64 = 120;
const MAX_STARTS: usize = 3;
const STEP_SECS: u64 = 10;
const MAX_DELAY_SECS: u64 = 60;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct StartLog {
    starts: Vec<DateTime<Utc>>,
}

impl StartLog {
    /// Records a start at `now` and returns how long it should wait.
    fn record_start(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        self.starts
            .retain(|started| (now - *started).num_seconds() <= WINDOW_SECS);
        self.starts.push(now);

        let extra = self.starts.len().checked_sub(MAX_STARTS).filter(|n| *n > 0)?;
        let secs = STEP_SECS.saturating_mul(extra as u64).min(MAX_DELAY_SECS);
        Some(Duration::from_secs(secs))
    }
}

/// Records this start and sleeps if the daemon is restarting in a loop.
pub fn apply_startup_backoff(path: &Path) {
    let mut log = match load(path) {
        Ok(log) => log,
        Err(err) => {
            warn!(error = %err, "Discarding unreadable backoff state");
            StartLog::default()
        }
    };
    let delay = log.record_start(Utc::now());

    if let Err(err) = save(path, &log) {
        warn!(error = %err, "Failed to persist daemon backoff state");
    }

    if let Some(delay) = delay {
        warn!(
            starts = log.starts.len(),
            delay_secs = delay.as_secs(),
            "Daemon restarting too often, delaying startup"
        );
        std::thread::sleep(delay);
    }
}

fn load(path: &Path) -> Result<StartLog, String> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(StartLog::default()),
        Err(err) => return Err(format!("Failed to read backoff state: {}", err)),
    };
    serde_json::from_slice(&data).map_err(|err| format!("Failed to parse backoff state: {}", err))
}

fn save(path: &Path, log: &StartLog) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| format!("Failed to create daemon dir: {}", err))?;
    }
    let payload = serde_json::to_vec_pretty(log)
        .map_err(|err| format!("Failed to serialize backoff state: {}", err))?;
    let staging = path.with_extension("tmp");
    fs::write(&staging, payload).map_err(|err| format!("Failed to write backoff state: {}", err))?;
    fs::rename(&staging, path).map_err(|err| format!("Failed to commit backoff state: {}", err))
}
