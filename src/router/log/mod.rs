//! Structured logging built on the `slog` stack.

use slog::Drain;

/// The logger handle threaded through the session dispatcher and the
/// listener. Cloning is cheap (`slog::Logger` is internally an `Arc`).
pub type Logger = slog::Logger;

/// Builds the root logger: async, term-formatted, with a source location
/// tag baked in. One call at process start; every other logger in the
/// crate is a child of this one (`log.new(o!(...))`).
pub fn root_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!("component" => "bw-peer"))
}
