//! Process-wide logging setup.
//!
//! [`init_with_level`] installs a stderr logger whose lines carry the time
//! since startup and the last path segment of the emitting module, which is
//! enough to follow a frame through detection, pose estimation and
//! alignment. With the `tracing` feature, [`init_tracing`] installs a
//! `tracing-subscriber` instead.

use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, fmt::format::FmtSpan, util::SubscriberInitExt, EnvFilter};

struct SiteLogger {
    max: LevelFilter,
    epoch: Instant,
}

fn format_line(since: Duration, record: &Record) -> String {
    let target = record.target();
    let module = target.rsplit("::").next().unwrap_or(target);
    let mut line = String::with_capacity(64);
    let _ = write!(
        line,
        "{:>9.3} {:<5} {module}: {}",
        since.as_secs_f64(),
        record.level(),
        record.args()
    );
    line
}

impl Log for SiteLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.max >= metadata.level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let line = format_line(self.epoch.elapsed(), record);
            let _ = writeln!(std::io::stderr().lock(), "{line}");
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<SiteLogger> = OnceLock::new();

/// Install the stderr logger filtering at `level`.
///
/// Only the first call installs anything; later calls return `Ok(())` and
/// keep the original level.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let mut fresh = false;
    let logger = LOGGER.get_or_init(|| {
        fresh = true;
        SiteLogger {
            max: level,
            epoch: Instant::now(),
        }
    });
    if fresh {
        log::set_logger(logger)?;
        log::set_max_level(logger.max);
    }
    Ok(())
}

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Span close events are emitted so the `instrument`ed pipeline stages show
/// their busy time. `json = true` switches to one JSON object per line.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    let installed = match json {
        true => builder.json().flatten_event(true).finish().try_init(),
        false => builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init(),
    };
    if installed.is_err() {
        log::debug!("tracing subscriber already installed");
    }
}
