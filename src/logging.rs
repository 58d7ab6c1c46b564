//! Logging setup for the library and the CLI.
//!
//! The library only emits through the `log` facade; binaries pick the backend.
//! Raw bytes on the optical link are traced at `trace` level.

use crate::util::hex::pretty_hex;
use log::{log_enabled, trace, Level, LevelFilter};
use std::time::{Duration, Instant};

/// Initializes the logger with the `env_logger` crate.
///
/// Defaults to `info`; `RUST_LOG` overrides it.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// Initializes `env_logger` at a fixed level for this crate, `warn` for everything else.
pub fn init_logger_with_level(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter_module("ultralite_mbus", level)
        .filter_module("ultralite_cli", level)
        .format_timestamp_millis()
        .try_init();
}

/// Traces a frame as a hex dump, one line per 16 bytes.
pub fn log_frame_hex(direction: &str, data: &[u8]) {
    if !log_enabled!(Level::Trace) {
        return;
    }
    trace!("{direction} {} bytes", data.len());
    for line in pretty_hex(data, 16).lines() {
        trace!("{direction}   {line}");
    }
}

/// Rate limiter for messages that repeat while a fault persists.
///
/// Allows up to `cap` messages per `window`; the counter restarts when a
/// window has passed.
#[derive(Debug)]
pub struct LogThrottle {
    window: Duration,
    cap: u32,
    count: u32,
    t0: Instant,
}

impl LogThrottle {
    pub fn new(window: Duration, cap: u32) -> Self {
        LogThrottle {
            window,
            cap,
            count: 0,
            t0: Instant::now(),
        }
    }

    /// Returns `true` if the message should be logged.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.t0) > self.window {
            self.t0 = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.cap
    }

    /// Start a new window immediately.
    pub fn reset(&mut self) {
        self.t0 = Instant::now();
        self.count = 0;
    }
}
