//! Tracing setup. Stdout belongs to the launcher, so logs go to a file.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter (e.g. `awsearch=debug`).
const LOG_ENV: &str = "AWSEARCH_LOG";

/// Install the global subscriber writing daily-rotated logs under `log_dir`.
///
/// Logging never stops a search. Without a usable `log_dir` events go to
/// stderr instead, and with `verbose` they go to stderr as well. The returned
/// guard flushes the file writer on drop and must outlive the program's work.
pub fn init(log_dir: Option<&Path>, verbose: bool) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  let file = match log_dir {
    Some(dir) => match file_writer(dir) {
      Ok(file) => Some(file),
      Err(e) => {
        eprintln!("awsearch: logging to stderr: {:#}", e);
        None
      }
    },
    None => None,
  };

  let (writer, guard) = match file {
    Some((writer, guard)) => (Some(writer), Some(guard)),
    None => (None, None),
  };

  let to_stderr = verbose || writer.is_none();
  let file_layer = writer.map(|writer| fmt::layer().with_writer(writer).with_ansi(false));
  let stderr_layer = to_stderr.then(|| fmt::layer().with_writer(std::io::stderr));

  if let Err(e) = tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
  {
    eprintln!("awsearch: failed to initialize logging: {}", e);
  }

  guard
}

fn file_writer(log_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "awsearch.log");
  Ok(tracing_appender::non_blocking(appender))
}
