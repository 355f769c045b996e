//! # Logging
//!
//! Structured logging for the RPC core, built on `tracing`. Verbosity is
//! controlled by the `LIBRPC_LOGGING` environment variable (spec §6),
//! defaulting to `info` when unset or unrecognized.

use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;

/// A custom tracing event formatter that colorizes the whole line by
/// severity, without timestamps cluttering interactive output.
///
/// `warn`/`error` lines also carry a bracketed level tag and the emitting
/// module's target (e.g. `[WARN transport::tcp]`), since those are the
/// levels the connection and transport read loops use for conditions an
/// operator actually needs to act on (a refused accept, a malformed
/// envelope, a failed send) — losing the level once color is stripped (a
/// file sink, `less` without `-R`, CI log capture) would make those
/// lines indistinguishable from routine `info`/`debug` traffic.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut buffer = String::new();
        let buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer, event)?;

        let level = *event.metadata().level();
        let line = match level {
            Level::WARN => format!("[WARN {}] {buffer}", event.metadata().target()),
            Level::ERROR => format!("[ERROR {}] {buffer}", event.metadata().target()),
            _ => buffer,
        };

        let colored_output = match level {
            Level::INFO => line.white(),
            Level::WARN => line.yellow(),
            Level::ERROR => line.red(),
            Level::DEBUG => line.blue(),
            Level::TRACE => line.purple(),
        };

        writeln!(writer, "{colored_output}")
    }
}

/// Read `LIBRPC_LOGGING` and translate it into an `EnvFilter` directive.
/// Accepts the standard level names case-insensitively; anything else (or
/// an unset variable) falls back to `info`.
fn filter_from_env() -> EnvFilter {
    let level = std::env::var("LIBRPC_LOGGING").unwrap_or_default();
    let directive = match level.to_lowercase().as_str() {
        "error" | "warn" | "info" | "debug" | "trace" => level.to_lowercase(),
        _ => "info".to_string(),
    };
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global tracing subscriber. Safe to call more than once
/// (subsequent calls are no-ops); library consumers embedding `librpc` in a
/// larger application that already configured `tracing` may skip this
/// entirely and rely on their own subscriber instead.
pub fn init() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .event_format(ColorizedFormatter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_level_falls_back_to_info() {
        std::env::remove_var("LIBRPC_LOGGING");
        let filter = filter_from_env();
        assert_eq!(filter.to_string(), "info");
    }
}
