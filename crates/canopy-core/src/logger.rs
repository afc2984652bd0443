//! Minimal stderr logger for pipeline runs.
//!
//! Lines look like `[  12.345s  WARN canopy_core::unify] message`: elapsed
//! wall time since installation, level, the emitting module, then the
//! message. Use `init_with_level` once at startup; library code only ever
//! talks to the `log` facade.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

struct StageLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StageLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        // One locked write per record keeps lines from parallel tiling
        // workers intact.
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:8.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StageLogger> = OnceLock::new();

/// Route `log` records at or above `level` to stderr.
///
/// Only the first call installs anything; the clock starts then.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    log::set_logger(LOGGER.get_or_init(|| StageLogger {
        level,
        started: Instant::now(),
    }))?;
    log::set_max_level(level);
    Ok(())
}

/// Parse a textual level (`error`, `warn`, `info`, `debug`, `trace`, `off`).
pub fn parse_level(raw: &str) -> Option<LevelFilter> {
    raw.trim().parse().ok()
}

/// Directive used when `RUST_LOG` is unset or unparsable.
#[cfg(feature = "tracing")]
fn fallback_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::new(level.as_str().to_ascii_lowercase())
}

/// Install a `tracing-subscriber` formatter.
///
/// `RUST_LOG` wins when set; otherwise everything at `level` and above is
/// shown. Stage spans are reported on close, so `json = true` yields one
/// structured record per finished stage.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, level: LevelFilter) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback_filter(level));
    let builder = fmt().with_env_filter(filter).with_span_events(FmtSpan::CLOSE);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder.with_timer(fmt::time::Uptime::default()).finish().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(parse_level("info"), Some(LevelFilter::Info));
        assert_eq!(parse_level(" WARN "), Some(LevelFilter::Warn));
        assert_eq!(parse_level("off"), Some(LevelFilter::Off));
        assert_eq!(parse_level("loud"), None);
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn tracing_fallback_follows_the_requested_level() {
        assert_eq!(fallback_filter(LevelFilter::Debug).to_string(), "debug");
    }
}
