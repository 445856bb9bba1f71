//! Dev-mode logging configuration.
//!
//! Writes structured JSONL logs to a central file that can be tailed
//! by external tools. Multi-process safe via append-only semantics.

use crate::json_layer::JsonLayer;
use crate::{env_filter, LogConfig};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Central log file location, `~/.household-webhooks/logs/dev.jsonl`.
/// Falls back to the temp dir when no home directory is known.
fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".household-webhooks")
        .join("logs")
        .join("dev.jsonl")
}

/// Append-only writer shared by every layer that targets the central file.
#[derive(Clone)]
pub struct CentralLogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl CentralLogWriter {
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl io::Write for CentralLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let result = guard.write(buf);
        // One flush per line keeps lines whole across processes.
        guard.flush()?;
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

#[derive(Clone)]
pub struct WriterFactory {
    writer: CentralLogWriter,
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = CentralLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}

/// Initialize the dev subscriber with central JSONL file output.
///
/// If the log file cannot be opened, logging degrades to stderr rather than
/// taking the service down.
pub fn init_dev_subscriber(config: &LogConfig) {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let writer = match CentralLogWriter::new(&log_path) {
        Ok(writer) => writer,
        Err(e) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter(&config.default_level))
                .compact()
                .finish()
                .try_init();
            tracing::warn!(
                log_path = %log_path.display(),
                error = %e,
                "central log file unavailable, logging to stderr"
            );
            return;
        }
    };

    let json_layer = JsonLayer::new(config.service_name.clone(), WriterFactory { writer });

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter("info"))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer.with_filter(env_filter(&config.default_level)))
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            log_path = %log_path.display(),
            "observability initialized"
        );
    }
}
