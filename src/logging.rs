use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
  filter::LevelFilter,
  fmt,
  layer::{Layer, SubscriberExt},
  util::SubscriberInitExt,
  EnvFilter,
};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "TRIBUTE_LOG";

const LOG_FILE_PREFIX: &str = "tribute.log";

/// Install the global tracing subscriber.
///
/// With `log_dir`, output goes to a daily-rolling file in that directory and
/// the returned guard must be held until shutdown to flush it. Without one,
/// output goes to stderr.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let env_filter = EnvFilter::builder()
    .with_env_var(LOG_ENV)
    .with_default_directive(LevelFilter::INFO.into())
    .from_env_lossy();

  let (fmt_layer, guard) = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();
      (layer, Some(guard))
    }
    None => (
      fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .boxed(),
      None,
    ),
  };

  tracing_subscriber::registry()
    .with(env_filter)
    .with(fmt_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
