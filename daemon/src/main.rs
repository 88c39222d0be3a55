use clap::Parser;
use opts::CliArgs;
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upgrade_daemon::{
    common::error::Result,
    config::UpgradeConfig,
    daemon::{Daemon, DaemonContext},
    device_api::http::HttpConnector,
    workdir::WorkDir,
};

mod opts;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = CliArgs::parse();

    let workdir = WorkDir::resolve(opts.work_dir())?;
    workdir.ensure_layout()?;
    let _guards = init_logging(&workdir, opts.log_level());

    let config = UpgradeConfig::load(&workdir).map_err(|error| {
        error!(%error, "Invalid configuration");
        error
    })?;
    let config = UpgradeConfig::initialize(config).clone();

    let connector = Box::new(HttpConnector::new(
        config.api.clone(),
        config.timeouts.clone(),
    ));
    let ctx = DaemonContext::build(workdir, config, connector)?;

    Daemon::new(ctx).run().await.map_err(|error| {
        error!(%error, "Daemon failed");
        error
    })
}

/// Initialize logging components -- console fmt plus daily-rolling text
/// and structured JSON files under the work directory.
fn init_logging(workdir: &WorkDir, level: &str) -> (WorkerGuard, WorkerGuard) {
    let text_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_suffix("log")
        .build(workdir.logs_text_dir())
        .expect("text log directory exists");
    let json_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_suffix("json")
        .build(workdir.logs_structured_dir())
        .expect("structured log directory exists");

    let (text_writer, text_guard) = tracing_appender::non_blocking(text_appender);
    let (json_writer, json_guard) = tracing_appender::non_blocking(json_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(text_writer))
        .with(fmt::layer().json().with_writer(json_writer))
        .init();

    (text_guard, json_guard)
}
