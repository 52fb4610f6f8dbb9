//! Session-scoped remote operations
//!
//! Each function opens its own session, does one unit of work, and closes
//! the session again whatever the outcome.

use super::{
    arrange_listing, decode_all, normalize_dir, ChannelError, DirEntry, ExitStatus, OutputChunk,
    PathStat, RemoteChannel,
};
use encoding_rs::Encoding;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Run one command and wait for its exit status
pub async fn run_command(
    channel: &dyn RemoteChannel,
    command: &str,
    output: mpsc::UnboundedSender<OutputChunk>,
    cancel: CancellationToken,
) -> Result<ExitStatus, ChannelError> {
    let mut session = channel.open().await?;
    let status = session.exec(command, output, cancel).await;
    session.close().await;
    status
}

/// Visible entries of a directory, directories first then by name
pub async fn list_directory(
    channel: &dyn RemoteChannel,
    path: &str,
) -> Result<Vec<DirEntry>, ChannelError> {
    let mut session = channel.open().await?;
    let entries = session.read_dir(&normalize_dir(path)).await;
    session.close().await;
    Ok(arrange_listing(entries?))
}

/// Existence probe; a missing path is not an error
pub async fn stat(channel: &dyn RemoteChannel, path: &str) -> Result<PathStat, ChannelError> {
    let mut session = channel.open().await?;
    let result = session.stat(path).await;
    session.close().await;
    result
}

/// Read a remote file as text in the given encoding
pub async fn read_text_file(
    channel: &dyn RemoteChannel,
    path: &str,
    encoding: &'static Encoding,
) -> Result<String, ChannelError> {
    let mut session = channel.open().await?;
    let bytes = session.read_file(path).await;
    session.close().await;
    Ok(decode_all(encoding, &bytes?))
}

/// Open and immediately close a session
pub async fn check_connection(channel: &dyn RemoteChannel) -> Result<(), ChannelError> {
    let session = channel.open().await?;
    session.close().await;
    log::info!("Connection to {} OK", channel.describe());
    Ok(())
}

/// Progress after each file of a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferProgress {
    pub path: String,
    pub attempted: usize,
    pub total: usize,
    pub ok: bool,
}

impl TransferProgress {
    /// Fraction of files attempted so far, in `[0, 1]`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.attempted as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferFailure {
    pub path: String,
    pub message: String,
}

/// Outcome of a multi-file operation. One failing file never stops the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub completed: Vec<String>,
    pub failures: Vec<TransferFailure>,
}

impl BatchReport {
    /// No file failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.completed.len() + self.failures.len()
    }
}

/// A file to place on the remote host
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub remote_path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub path: String,
    pub bytes: Vec<u8>,
}

struct Batch<'a> {
    report: BatchReport,
    progress: Option<&'a mpsc::UnboundedSender<TransferProgress>>,
}

impl<'a> Batch<'a> {
    fn new(total: usize, progress: Option<&'a mpsc::UnboundedSender<TransferProgress>>) -> Self {
        Self {
            report: BatchReport {
                total,
                ..BatchReport::default()
            },
            progress,
        }
    }

    fn record(&mut self, path: &str, result: Result<(), ChannelError>) {
        let ok = result.is_ok();
        match result {
            Ok(()) => self.report.completed.push(path.to_string()),
            Err(e) => {
                log::warn!("Batch item {} failed: {}", path, e);
                self.report.failures.push(TransferFailure {
                    path: path.to_string(),
                    message: e.to_string(),
                });
            }
        }
        if let Some(tx) = self.progress {
            let _ = tx.send(TransferProgress {
                path: path.to_string(),
                attempted: self.report.attempted(),
                total: self.report.total,
                ok,
            });
        }
    }
}

/// Upload a batch of files, one session for the whole batch
pub async fn upload_files(
    channel: &dyn RemoteChannel,
    items: Vec<UploadItem>,
    progress: Option<&mpsc::UnboundedSender<TransferProgress>>,
) -> Result<BatchReport, ChannelError> {
    let mut session = channel.open().await?;
    let mut batch = Batch::new(items.len(), progress);

    for item in items {
        let result = session.write_file(&item.remote_path, item.bytes).await;
        batch.record(&item.remote_path, result);
    }

    session.close().await;
    Ok(batch.report)
}

/// Download a batch of files, returning the bytes of each one that succeeded
pub async fn download_files(
    channel: &dyn RemoteChannel,
    paths: &[String],
    progress: Option<&mpsc::UnboundedSender<TransferProgress>>,
) -> Result<(BatchReport, Vec<DownloadedFile>), ChannelError> {
    let mut session = channel.open().await?;
    let mut batch = Batch::new(paths.len(), progress);
    let mut files = Vec::new();

    for path in paths {
        match session.read_file(path).await {
            Ok(bytes) => {
                files.push(DownloadedFile {
                    path: path.clone(),
                    bytes,
                });
                batch.record(path, Ok(()));
            }
            Err(e) => batch.record(path, Err(e)),
        }
    }

    session.close().await;
    Ok((batch.report, files))
}

/// Delete a batch of remote files
pub async fn delete_files(
    channel: &dyn RemoteChannel,
    paths: &[String],
    progress: Option<&mpsc::UnboundedSender<TransferProgress>>,
) -> Result<BatchReport, ChannelError> {
    let mut session = channel.open().await?;
    let mut batch = Batch::new(paths.len(), progress);

    for path in paths {
        let result = session.remove_file(path).await;
        batch.record(path, result);
    }

    session.close().await;
    Ok(batch.report)
}
