//! aria2c-backed transfer engine

use super::parser::{classify_exit, parse_readout};
use super::{EngineProgress, EngineSettings, TransferEngine, TransferItem};
use crate::config::EngineConfig;
use crate::error::{Error, FetchError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Number of trailing output lines kept for error classification
const OUTPUT_TAIL_LINES: usize = 20;

/// Transfer engine that runs one `aria2c` process per file
///
/// Each process opens a single connection (`--split=1`); the adapter's shared
/// host slots decide how many run against one server at a time. Retries are
/// left to the caller (`--max-tries=1`).
///
/// # Examples
///
/// ```no_run
/// use gallery_dl_core::transfer::Aria2Engine;
///
/// let engine = Aria2Engine::from_path().expect("aria2c not found in PATH");
/// ```
#[derive(Clone, Debug)]
pub struct Aria2Engine {
    binary_path: PathBuf,
}

impl Aria2Engine {
    /// Create an engine with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find aria2c in PATH
    pub fn from_path() -> Option<Self> {
        which::which("aria2c").ok().map(Self::new)
    }

    /// Resolve the binary from configuration
    ///
    /// Uses `aria2_path` when set, otherwise searches PATH (if allowed).
    /// Fails with [`Error::NotSupported`] when no binary can be found.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        if let Some(path) = &config.aria2_path {
            return Ok(Self::new(path.clone()));
        }
        if config.search_path
            && let Some(engine) = Self::from_path()
        {
            return Ok(engine);
        }
        Err(Error::NotSupported(
            "aria2c not found; install aria2 or set engine.aria2_path".to_string(),
        ))
    }

    /// Path of the binary this engine runs
    pub fn binary_path(&self) -> &PathBuf {
        &self.binary_path
    }

    fn command(&self, item: &TransferItem, settings: &EngineSettings) -> Result<Command> {
        let dir = item.destination.parent().ok_or_else(|| {
            Error::Other(format!(
                "destination {} has no parent directory",
                item.destination.display()
            ))
        })?;
        let file_name = item
            .destination
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::Other(format!(
                    "destination {} has no file name",
                    item.destination.display()
                ))
            })?;

        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("--dir")
            .arg(dir)
            .arg("--out")
            .arg(file_name)
            // Each process is one host slot, so it must hold one connection
            .arg("--split=1")
            .arg("--max-connection-per-server=1")
            .arg("--max-tries=1")
            .arg(format!("--timeout={}", settings.timeout.as_secs().max(1)))
            .arg(format!(
                "--connect-timeout={}",
                settings.connect_timeout.as_secs().max(1)
            ))
            .arg("--allow-overwrite=true")
            .arg("--auto-file-renaming=false")
            .arg("--file-allocation=none")
            .arg("--summary-interval=1")
            .arg("--show-console-readout=true")
            .arg("--console-log-level=error")
            .arg("--enable-color=false")
            .arg(&item.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl TransferEngine for Aria2Engine {
    async fn fetch_one(
        &self,
        item: &TransferItem,
        settings: &EngineSettings,
        progress: mpsc::Sender<EngineProgress>,
    ) -> std::result::Result<u64, FetchError> {
        let mut cmd = self
            .command(item, settings)
            .map_err(|e| FetchError::Io(e.to_string()))?;

        let mut child = cmd.spawn().map_err(|e| {
            FetchError::EngineFailure(format!(
                "failed to execute {}: {e}",
                self.binary_path.display()
            ))
        })?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut tail: Vec<String> = Vec::with_capacity(OUTPUT_TAIL_LINES);
        if let Some(stdout) = child.stdout.take() {
            let mut segments = BufReader::new(stdout).split(b'\n');
            while let Ok(Some(segment)) = segments.next_segment().await {
                let text = String::from_utf8_lossy(&segment);
                // Readouts may be separated by carriage returns only
                for line in text.split('\r').filter(|l| !l.trim().is_empty()) {
                    if let Some(update) = parse_readout(line) {
                        let _ = progress.send(update).await;
                    }
                    if tail.len() == OUTPUT_TAIL_LINES {
                        tail.remove(0);
                    }
                    tail.push(line.to_string());
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| FetchError::EngineFailure(format!("failed to wait for aria2c: {e}")))?;

        let stderr_output = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let output = format!("{}\n{}", tail.join("\n"), stderr_output);
            let error = classify_exit(status.code(), &output);
            tracing::debug!(
                url = %item.url,
                code = ?status.code(),
                error = %error,
                "aria2c reported failure"
            );
            return Err(error);
        }

        let metadata = tokio::fs::metadata(&item.destination)
            .await
            .map_err(|e| FetchError::Io(format!("{}: {e}", item.destination.display())))?;
        if metadata.len() == 0 {
            return Err(FetchError::Io(format!(
                "{} is empty after download",
                item.destination.display()
            )));
        }

        Ok(metadata.len())
    }

    fn name(&self) -> &'static str {
        "aria2c"
    }
}
