//! Dual syslog+stderr logging, tagged with the severities spec.md §6 names:
//! `{ERROR, WARNING, NOTICE, INFO, DEBUG}`.
//!
//! `log::Level` has no `Notice` variant, so `NOTICE` records are emitted at
//! `Info` under a dedicated target and routed to `syslog`'s own `notice`
//! method; everything else maps onto `log::Level` directly.

use std::sync::Mutex;

use syslog::{Facility, Formatter3164, Logger, LoggerBackend};

/// Target used by the [`notice!`] macro so the sink can tell a `NOTICE`
/// record apart from an ordinary `Info` one.
pub const NOTICE_TARGET: &str = "unsharedfs::notice";

/// Logs at `NOTICE` severity.
#[macro_export]
macro_rules! notice {
    ($($arg:tt)+) => {
        log::info!(target: $crate::logger::NOTICE_TARGET, $($arg)+)
    };
}

struct DualLogger {
    syslog: Mutex<Option<Logger<LoggerBackend, Formatter3164>>>,
    stderr: bool,
}

impl log::Log for DualLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let message = format!("{}", record.args());
        let is_notice = record.target() == NOTICE_TARGET;

        // spec.md §6: only messages at severity higher than DEBUG reach the
        // system log when one is compiled in; DEBUG/TRACE stay on stderr
        // only.
        let reaches_syslog = is_notice || !matches!(record.level(), log::Level::Debug | log::Level::Trace);
        if reaches_syslog {
            if let Some(logger) = self.syslog.lock().unwrap().as_mut() {
                let result = if is_notice {
                    logger.notice(message.clone())
                } else {
                    match record.level() {
                        log::Level::Error => logger.err(message.clone()),
                        log::Level::Warn => logger.warning(message.clone()),
                        _ => logger.info(message.clone()),
                    }
                };
                if let Err(e) = result {
                    eprintln!("unsharedfs: syslog write failed: {e}");
                }
            }
        }

        if self.stderr {
            let label = if is_notice { "NOTICE" } else { record.level().as_str() };
            eprintln!("unsharedfs[{label}]: {message}");
        }
    }

    fn flush(&self) {}
}

/// Installs the dual-sink logger as the global `log` backend. `stderr`
/// controls whether records are also written to standard error (always on
/// in practice, per spec.md §6: "all messages are additionally written to
/// standard error"). `debug` raises the level from `INFO` to `DEBUG`,
/// mirroring libfuse's own `-d` flag.
pub fn init(stderr: bool, debug: bool) {
    let formatter = Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "unsharedfs".into(),
        pid: std::process::id() as i32,
    };
    let syslog_sink = syslog::unix(formatter)
        .map_err(|e| eprintln!("unsharedfs: could not connect to syslog: {e}"))
        .ok();

    let logger = DualLogger {
        syslog: Mutex::new(syslog_sink),
        stderr,
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        let level = if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        log::set_max_level(level);
    }
}
