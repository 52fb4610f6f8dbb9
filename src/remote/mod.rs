//! Remote channel - command execution and file transfer on the remote host
//!
//! A [`RemoteChannel`] knows how to reach a host; each call to
//! [`RemoteChannel::open`] yields a fresh [`RemoteSession`] that lives for one
//! logical unit of work (a command, or a batch of transfers) and is then
//! closed. The free functions in this module (`run_command`,
//! `list_directory`, `upload_files`, ...) follow that open/work/close shape.

mod credential;
mod encoding;
mod memory;
mod ops;
mod ssh;

pub use credential::RemoteCredential;
pub use encoding::{decode_all, resolve_encoding, TextDecoder};
pub use memory::{MemoryChannel, ScriptedCommand};
pub use ops::{
    check_connection, delete_files, download_files, list_directory, read_text_file,
    run_command, stat, upload_files, BatchReport, DownloadedFile, TransferFailure,
    TransferProgress, UploadItem,
};
pub use ssh::{SshChannel, SshSettings};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Entries never shown in a directory listing (besides dot-files)
pub const HIDDEN_SYSTEM_FILES: [&str; 3] = ["pagefile.sys", "hiberfil.sys", "swapfile.sys"];

#[derive(Debug, Error)]
pub enum ChannelError {
    /// TCP connect or SSH handshake failed
    #[error("could not connect to {target}: {message}")]
    Connect { target: String, message: String },

    #[error("authentication failed for {user}@{target}")]
    Authentication { user: String, target: String },

    /// Protocol failure on an established session
    #[error("remote session error: {0}")]
    Session(String),

    /// A file operation on one path failed
    #[error("{path}: {message}")]
    Path { path: String, message: String },

    #[error("remote operation cancelled")]
    Cancelled,
}

impl ChannelError {
    /// True when no session could be established at all
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Authentication { .. })
    }

    pub(crate) fn path(path: &str, message: impl fmt::Display) -> Self {
        Self::Path {
            path: path.to_string(),
            message: message.to_string(),
        }
    }
}

/// Incremental command output, already decoded to text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stream", content = "text", rename_all = "snake_case")]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

impl OutputChunk {
    /// Decoded text of the chunk
    pub fn text(&self) -> &str {
        match self {
            Self::Stdout(t) | Self::Stderr(t) => t,
        }
    }
}

/// Terminal event of a remote command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<String>,
}

impl ExitStatus {
    /// Normal exit with `code`
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Exit code 0 and no signal
    pub fn success(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.signal, self.code) {
            (Some(signal), _) => write!(f, "killed by signal {}", signal),
            (None, Some(code)) => write!(f, "exit code {}", code),
            (None, None) => write!(f, "no exit status"),
        }
    }
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub permissions: u32,
    pub is_directory: bool,
}

impl DirEntry {
    /// Name with a trailing `/` for directories
    pub fn display_name(&self) -> String {
        if self.is_directory {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }

    /// `rwxr-xr-x` form of the permission bits
    pub fn permissions_string(&self) -> String {
        permissions_string(self.permissions)
    }
}

/// Existence probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PathStat {
    pub exists: bool,
    pub is_directory: bool,
}

/// Something that can open sessions on one remote host
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Establish a new session. Failures here are connection-class errors.
    async fn open(&self) -> Result<Box<dyn RemoteSession>, ChannelError>;

    /// Short `user@host:port` style label for logs
    fn describe(&self) -> String;
}

/// One open connection. At most one command is in flight per session.
#[async_trait]
pub trait RemoteSession: Send {
    /// Run a command, streaming decoded output chunks until it terminates
    async fn exec(
        &mut self,
        command: &str,
        output: mpsc::UnboundedSender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<ExitStatus, ChannelError>;

    /// Raw directory entries, unfiltered and unsorted
    async fn read_dir(&mut self, path: &str) -> Result<Vec<DirEntry>, ChannelError>;

    async fn stat(&mut self, path: &str) -> Result<PathStat, ChannelError>;

    async fn read_file(&mut self, path: &str) -> Result<Vec<u8>, ChannelError>;

    async fn write_file(&mut self, path: &str, bytes: Vec<u8>) -> Result<(), ChannelError>;

    async fn remove_file(&mut self, path: &str) -> Result<(), ChannelError>;

    async fn close(self: Box<Self>);
}

/// Drop hidden and OS paging entries, then order directories first and by name
pub fn arrange_listing(entries: Vec<DirEntry>) -> Vec<DirEntry> {
    let mut visible: Vec<DirEntry> = entries
        .into_iter()
        .filter(|e| !e.name.starts_with('.') && !HIDDEN_SYSTEM_FILES.contains(&e.name.as_str()))
        .collect();
    visible.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.cmp(&b.name))
    });
    visible
}

/// Collapse repeated slashes and force a leading slash
pub fn normalize_dir(dir: &str) -> String {
    let mut out = String::with_capacity(dir.len() + 1);
    out.push('/');
    for segment in dir.split('/').filter(|s| !s.is_empty()) {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// POSIX path join; an absolute `name` wins
pub fn join_path(dir: &str, name: &str) -> String {
    if name.starts_with('/') || dir.is_empty() {
        return name.to_string();
    }
    let dir = dir.trim_end_matches('/');
    format!("{}/{}", dir, name)
}

/// Last path segment
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Human readable size, e.g. `1.5 KB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", text, UNITS[unit])
}

/// Render the low nine mode bits as `rwxr-xr-x`
pub fn permissions_string(mode: u32) -> String {
    const TRIPLETS: [&str; 8] = ["---", "--x", "-w-", "-wx", "r--", "r-x", "rw-", "rwx"];
    [6, 3, 0]
        .iter()
        .map(|shift| TRIPLETS[((mode >> shift) & 0o7) as usize])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_directory: bool) -> DirEntry {
        DirEntry {
            name: name.into(),
            size: 0,
            modified: None,
            permissions: 0o644,
            is_directory,
        }
    }

    #[test]
    fn test_arrange_listing() {
        let listing = arrange_listing(vec![
            entry("notes.txt", false),
            entry(".hidden", false),
            entry("pagefile.sys", false),
            entry("zeta", true),
            entry("Alpha.txt", false),
            entry("data", true),
            entry(".cache", true),
        ]);
        let names: Vec<String> = listing.iter().map(|e| e.display_name()).collect();
        assert_eq!(names, vec!["data/", "zeta/", "Alpha.txt", "notes.txt"]);
    }

    #[test]
    fn test_paths() {
        assert_eq!(normalize_dir("data//raw///"), "/data/raw");
        assert_eq!(normalize_dir(""), "/");
        assert_eq!(normalize_dir("//"), "/");
        assert_eq!(join_path("/", "a.fq"), "/a.fq");
        assert_eq!(join_path("/scratch/run/", "x"), "/scratch/run/x");
        assert_eq!(join_path("/scratch", "/abs/y"), "/abs/y");
        assert_eq!(file_name("/data/reads.fq"), "reads.fq");
        assert_eq!(file_name("/data/qc/"), "qc");
        assert_eq!(file_name("plain"), "plain");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5 MB");
    }

    #[test]
    fn test_permissions_string() {
        assert_eq!(permissions_string(0o755), "rwxr-xr-x");
        assert_eq!(permissions_string(0o100644), "rw-r--r--");
        assert_eq!(permissions_string(0), "---------");
    }

    #[test]
    fn test_exit_status() {
        assert!(ExitStatus::code(0).success());
        assert!(!ExitStatus::code(2).success());
        let killed = ExitStatus {
            code: None,
            signal: Some("KILL".into()),
        };
        assert!(!killed.success());
        assert_eq!(killed.to_string(), "killed by signal KILL");
        assert_eq!(ExitStatus::code(3).to_string(), "exit code 3");
    }

    #[test]
    fn test_connection_class() {
        let connect = ChannelError::Connect {
            target: "h:22".into(),
            message: "refused".into(),
        };
        assert!(connect.is_connection());
        assert!(!ChannelError::Session("eof".into()).is_connection());
        assert!(!ChannelError::path("/x", "denied").is_connection());
    }
}
