//! Logging setup for applications and tests built on dogleg-solver.
//!
//! The library itself only emits `tracing` events; nothing is printed until a
//! subscriber is installed. Per-attempt iteration tables are emitted at DEBUG,
//! controller phase transitions at TRACE.

use tracing::Level;

/// Install the standard subscriber at INFO (overridable via `RUST_LOG`).
///
/// Format: `[LEVEL YYYY-MM-DD HH:MM:SS module]` for INFO/WARN/ERROR,
///         `[LEVEL YYYY-MM-DD HH:MM:SS file:line]` for DEBUG/TRACE.
///
/// # Example
/// ```no_run
/// use dogleg_solver::init_logger;
///
/// init_logger();
/// tracing::info!("Application started");
/// ```
///
/// # Environment Variables
/// ```bash
/// RUST_LOG=debug cargo test
/// RUST_LOG=dogleg_solver::optimizer=trace cargo test
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the standard subscriber with a custom default level.
///
/// Calling it again once a global subscriber exists is a no-op, so every test
/// may call it.
///
/// ```no_run
/// use dogleg_solver::init_logger_with_level;
/// use tracing::Level;
///
/// init_logger_with_level(Level::DEBUG);
/// tracing::debug!("iteration tables enabled");
/// ```
pub fn init_logger_with_level(default_level: Level) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .event_format(SolverFormatter)
        .try_init();

    if installed.is_err() {
        tracing::debug!("global subscriber already installed, keeping it");
    }
}

/// Colored level tag, padded to a fixed width.
fn level_label(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[31mERROR\x1b[0m",
        Level::WARN => "\x1b[33mWARN \x1b[0m",
        Level::INFO => "\x1b[32mINFO \x1b[0m",
        Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
        Level::TRACE => "\x1b[35mTRACE\x1b[0m",
    }
}

/// Drop the crate prefix from module targets: `dogleg_solver::optimizer::dog_leg` → `optimizer::dog_leg`.
fn short_target(target: &str) -> &str {
    target.strip_prefix("dogleg_solver::").unwrap_or(target)
}

/// Bracketed event formatter.
struct SolverFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for SolverFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        use chrono::Local;

        let metadata = event.metadata();
        let level = metadata.level();

        write!(
            writer,
            "[{} {} ",
            level_label(level),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;

        let detailed = *level == Level::DEBUG || *level == Level::TRACE;
        match (detailed, metadata.file()) {
            (true, Some(file)) => {
                let filename = file.rsplit('/').next().unwrap_or(file);
                write!(writer, "{}:{}", filename, metadata.line().unwrap_or(0))?;
            }
            _ => write!(writer, "{}", short_target(metadata.target()))?,
        }

        write!(writer, "] ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
