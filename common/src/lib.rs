//! Common utilities and types for `rput`
//!
//! This crate holds the upload pipeline behind the `rput` binary: the remote inventory, the
//! tree walker, the copy workers and the progress aggregator, plus the runtime setup shared by
//! every entry point.
//!
//! # Modules
//!
//! - [`inventory`] - listing every object already stored under the destination prefix
//! - [`walk`] - concurrent discovery of regular files under the source root
//! - [`push`] - the copy coordinator that ties the above together and uploads missing files
//! - [`progress`] - counting skip/copy decisions and drawing the status line
//! - [`config`] - runtime, throttle, output and logging configuration
//!
//! # Entry point
//!
//! [`run`] builds the tokio runtime, installs the JSON log subscriber, configures the
//! process-wide throttles and then drives the supplied future to completion. Errors are logged
//! and reported on stderr, after which `run` returns `None` and the caller exits with a failure
//! status.

pub mod config;
pub mod inventory;
pub mod progress;
pub mod push;
pub mod walk;

mod testutils;

pub use config::{LogTarget, LoggingConfig, OutputConfig, RuntimeConfig, ThrottleConfig};

fn make_writer(
    target: &LogTarget,
) -> anyhow::Result<tracing_subscriber::fmt::writer::BoxMakeWriter> {
    use anyhow::Context;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    Ok(match target {
        LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogTarget::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {:?}", &path))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
    })
}

fn init_logging(output: &OutputConfig, logging: &LoggingConfig) -> anyhow::Result<()> {
    let default_level = tracing_subscriber::filter::LevelFilter::from_level(output.level());
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(make_writer(&logging.target)?);
    if let Err(error) = subscriber.try_init() {
        // a subscriber installed by the embedding process stays in place
        output.report(&format_args!("structured logging not initialized: {error}"));
    }
    Ok(())
}

fn build_runtime(runtime: &RuntimeConfig) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    builder.build()
}

/// Runs `func` on a fresh runtime and reports its outcome.
///
/// Returns `None` if the setup or `func` failed, the error having been logged and (unless
/// quiet) printed to stderr.
pub fn run<Fut, Summary, Error>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    throttle: ThrottleConfig,
    logging: LoggingConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Error: std::fmt::Display + std::fmt::Debug,
    Fut: std::future::Future<Output = Result<Summary, Error>>,
{
    if let Err(error) = init_logging(&output, &logging) {
        output.report(&format_args!("{error:#}"));
        return None;
    }
    let runtime = match build_runtime(&runtime) {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("failed to build the async runtime: {:#}", &error);
            output.report(&format_args!("failed to build the async runtime: {error:#}"));
            return None;
        }
    };
    let res = runtime.block_on(async move {
        if let Some(max_open_files) = throttle.max_open_files {
            throttle::set_max_open_files(max_open_files);
        }
        if let Some((tokens, interval)) = throttle::ops_schedule(throttle.ops_throttle) {
            throttle::init_ops_tokens(tokens);
            tokio::spawn(throttle::run_ops_replenish_thread(tokens, interval));
        }
        func().await
    });
    match res {
        Ok(summary) => {
            if output.print_summary {
                eprintln!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", &error);
            output.report(&format_args!("{error:#}"));
            None
        }
    }
}
