//! In-memory remote host for dry runs and tests

use super::{
    file_name, normalize_dir, ChannelError, DirEntry, ExitStatus, OutputChunk, PathStat,
    RemoteChannel, RemoteSession, TextDecoder,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Canned behavior for commands containing a given pattern
#[derive(Debug, Clone, Default)]
pub struct ScriptedCommand {
    /// Raw stdout, delivered chunk by chunk
    pub stdout: Vec<Vec<u8>>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub signal: Option<String>,
    /// Never terminates on its own; only cancellation ends it
    pub hang: bool,
}

impl ScriptedCommand {
    /// Command that exits with `code`
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    /// Command that runs until cancelled
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Command terminated by `signal`
    pub fn killed(signal: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            signal: Some(signal.into()),
            ..Self::default()
        }
    }

    /// Append one stdout chunk
    pub fn stdout(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdout.push(bytes.into());
        self
    }

    /// Append stderr bytes
    pub fn stderr(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stderr.extend(bytes.into());
        self
    }
}

#[derive(Debug, Clone)]
enum Inode {
    File { bytes: Vec<u8>, modified: DateTime<Utc> },
    Directory { modified: DateTime<Utc> },
}

#[derive(Debug, Default)]
struct Host {
    inodes: BTreeMap<String, Inode>,
    scripts: Vec<(String, ScriptedCommand)>,
    failing_paths: HashSet<String>,
    /// Remaining sessions that may be opened; `None` is unlimited
    session_budget: Option<usize>,
    executed: Vec<String>,
    opened: usize,
    closed: usize,
}

fn parent_of(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

/// A fake host whose state is shared by every session it opens
#[derive(Clone)]
pub struct MemoryChannel {
    host: Arc<Mutex<Host>>,
    encoding: &'static Encoding,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    /// Create an empty host
    pub fn new() -> Self {
        Self {
            host: Arc::new(Mutex::new(Host::default())),
            encoding: encoding_rs::UTF_8,
        }
    }

    /// Decode scripted output with a non-UTF-8 encoding
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn host(&self) -> MutexGuard<'_, Host> {
        lock(&self.host)
    }

    /// Create a file (and its parent directories)
    pub fn add_file(&self, path: &str, bytes: impl Into<Vec<u8>>) -> &Self {
        let path = normalize_dir(path);
        self.add_dir(&parent_of(&path));
        self.host().inodes.insert(
            path,
            Inode::File {
                bytes: bytes.into(),
                modified: Utc::now(),
            },
        );
        self
    }

    /// Create a directory and its parents
    pub fn add_dir(&self, path: &str) -> &Self {
        let mut current = String::new();
        let mut host = self.host();
        for segment in normalize_dir(path).split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            host.inodes
                .entry(current.clone())
                .or_insert(Inode::Directory {
                    modified: Utc::now(),
                });
        }
        drop(host);
        self
    }

    /// Commands containing `pattern` behave as `script`; first match wins
    pub fn script(&self, pattern: impl Into<String>, script: ScriptedCommand) -> &Self {
        self.host().scripts.push((pattern.into(), script));
        self
    }

    /// Every file operation on `path` fails
    pub fn fail_path(&self, path: &str) -> &Self {
        self.host().failing_paths.insert(normalize_dir(path));
        self
    }

    /// Allow `n` more sessions, then refuse connections
    pub fn refuse_after(&self, n: usize) -> &Self {
        self.host().session_budget = Some(n);
        self
    }

    /// Refuse every further session
    pub fn refuse_connections(&self) -> &Self {
        self.refuse_after(0)
    }

    /// Commands executed so far, in order
    pub fn executed_commands(&self) -> Vec<String> {
        self.host().executed.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.host().opened
    }

    /// Sessions opened but not yet closed
    pub fn sessions_open(&self) -> usize {
        let host = self.host();
        host.opened - host.closed
    }

    /// Current contents of a file
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.host().inodes.get(&normalize_dir(path)) {
            Some(Inode::File { bytes, .. }) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        let path = normalize_dir(path);
        path == "/" || self.host().inodes.contains_key(&path)
    }
}

fn lock(host: &Mutex<Host>) -> MutexGuard<'_, Host> {
    host.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RemoteChannel for MemoryChannel {
    async fn open(&self) -> Result<Box<dyn RemoteSession>, ChannelError> {
        let mut host = self.host();
        if let Some(budget) = host.session_budget.as_mut() {
            if *budget == 0 {
                return Err(ChannelError::Connect {
                    target: "memory".to_string(),
                    message: "connection refused".to_string(),
                });
            }
            *budget -= 1;
        }
        host.opened += 1;
        Ok(Box::new(MemorySession {
            host: Arc::clone(&self.host),
            encoding: self.encoding,
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

struct MemorySession {
    host: Arc<Mutex<Host>>,
    encoding: &'static Encoding,
}

impl MemorySession {
    fn check_path(host: &Host, path: &str) -> Result<(), ChannelError> {
        if host.failing_paths.contains(path) {
            Err(ChannelError::path(path, "permission denied"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn exec(
        &mut self,
        command: &str,
        output: mpsc::UnboundedSender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<ExitStatus, ChannelError> {
        let script = {
            let mut host = lock(&self.host);
            host.executed.push(command.to_string());
            host.scripts
                .iter()
                .find(|(pattern, _)| command.contains(pattern.as_str()))
                .map(|(_, script)| script.clone())
                .unwrap_or_default()
        };

        if script.hang {
            cancel.cancelled().await;
            return Err(ChannelError::Cancelled);
        }
        if cancel.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }

        let mut stdout = TextDecoder::new(self.encoding);
        for chunk in &script.stdout {
            let text = stdout.decode(chunk);
            if !text.is_empty() {
                let _ = output.send(OutputChunk::Stdout(text));
            }
        }
        let tail = stdout.finish();
        if !tail.is_empty() {
            let _ = output.send(OutputChunk::Stdout(tail));
        }
        if !script.stderr.is_empty() {
            let mut stderr = TextDecoder::new(self.encoding);
            let mut text = stderr.decode(&script.stderr);
            text.push_str(&stderr.finish());
            let _ = output.send(OutputChunk::Stderr(text));
        }

        Ok(match script.signal {
            Some(signal) => ExitStatus {
                code: None,
                signal: Some(signal),
            },
            None => ExitStatus::code(script.exit_code),
        })
    }

    async fn read_dir(&mut self, path: &str) -> Result<Vec<DirEntry>, ChannelError> {
        let host = lock(&self.host);
        let dir = normalize_dir(path);
        Self::check_path(&host, &dir)?;
        if dir != "/" && !matches!(host.inodes.get(&dir), Some(Inode::Directory { .. })) {
            return Err(ChannelError::path(&dir, "no such directory"));
        }

        Ok(host
            .inodes
            .iter()
            .filter(|(p, _)| parent_of(p) == dir)
            .map(|(p, inode)| match inode {
                Inode::File { bytes, modified } => DirEntry {
                    name: file_name(p).to_string(),
                    size: bytes.len() as u64,
                    modified: Some(*modified),
                    permissions: 0o100644,
                    is_directory: false,
                },
                Inode::Directory { modified } => DirEntry {
                    name: file_name(p).to_string(),
                    size: 4096,
                    modified: Some(*modified),
                    permissions: 0o40755,
                    is_directory: true,
                },
            })
            .collect())
    }

    async fn stat(&mut self, path: &str) -> Result<PathStat, ChannelError> {
        let host = lock(&self.host);
        let path = normalize_dir(path);
        if path == "/" {
            return Ok(PathStat {
                exists: true,
                is_directory: true,
            });
        }
        Ok(match host.inodes.get(&path) {
            Some(inode) => PathStat {
                exists: true,
                is_directory: matches!(inode, Inode::Directory { .. }),
            },
            None => PathStat::default(),
        })
    }

    async fn read_file(&mut self, path: &str) -> Result<Vec<u8>, ChannelError> {
        let host = lock(&self.host);
        let path = normalize_dir(path);
        Self::check_path(&host, &path)?;
        match host.inodes.get(&path) {
            Some(Inode::File { bytes, .. }) => Ok(bytes.clone()),
            Some(Inode::Directory { .. }) => Err(ChannelError::path(&path, "is a directory")),
            None => Err(ChannelError::path(&path, "no such file")),
        }
    }

    async fn write_file(&mut self, path: &str, bytes: Vec<u8>) -> Result<(), ChannelError> {
        let mut host = lock(&self.host);
        let path = normalize_dir(path);
        Self::check_path(&host, &path)?;
        let parent = parent_of(&path);
        if parent != "/" && !matches!(host.inodes.get(&parent), Some(Inode::Directory { .. })) {
            return Err(ChannelError::path(&path, "no such directory"));
        }
        host.inodes.insert(
            path,
            Inode::File {
                bytes,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn remove_file(&mut self, path: &str) -> Result<(), ChannelError> {
        let mut host = lock(&self.host);
        let path = normalize_dir(path);
        Self::check_path(&host, &path)?;
        match host.inodes.get(&path) {
            Some(Inode::File { .. }) => {
                host.inodes.remove(&path);
                Ok(())
            }
            Some(Inode::Directory { .. }) => Err(ChannelError::path(&path, "is a directory")),
            None => Err(ChannelError::path(&path, "no such file")),
        }
    }

    async fn close(self: Box<Self>) {
        lock(&self.host).closed += 1;
    }
}
