use std::io;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default stdout filter, overridable through `RUST_LOG`.
const STDOUT_FILTER: &str = "info,similarity_index=warn,db_query=warn,sqlx=off";

/// Installs the global subscriber: a stdout layer plus, when `log_dir` is
/// given, a daily rolling file named `<name>.log`.
pub fn configure_logging(name: &str, log_dir: Option<&str>) {
    let stdout_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(STDOUT_FILTER));

    let stdout_log = fmt::layer()
        .with_writer(io::stdout)
        .with_target(true)
        .with_filter(stdout_filter);

    let file_log = log_dir.map(|dir| {
        let file_appender = rolling::daily(dir, format!("{}.log", name));
        fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_filter(EnvFilter::new("debug,sqlx=info"))
    });

    tracing_subscriber::Registry::default()
        .with(stdout_log)
        .with(file_log)
        .init();
}
