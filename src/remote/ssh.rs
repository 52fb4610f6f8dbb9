//! SSH/SFTP channel backed by libssh2
//!
//! libssh2 is blocking, so every session call runs inside
//! `tokio::task::spawn_blocking` against a shared `Session`.

use super::{
    ChannelError, DirEntry, ExitStatus, OutputChunk, PathStat, RemoteChannel, RemoteCredential,
    RemoteSession, TextDecoder,
};
use async_trait::async_trait;
use chrono::DateTime;
use encoding_rs::Encoding;
use ssh2::{Channel, Session};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const READ_BUFFER: usize = 16 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Connection tuning for [`SshChannel`]
#[derive(Debug, Clone, Copy)]
pub struct SshSettings {
    /// Encoding of remote command output and text files
    pub encoding: &'static Encoding,
    /// Bound on TCP connect plus handshake/authentication
    pub connect_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            encoding: encoding_rs::UTF_8,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens one SSH connection per unit of work
pub struct SshChannel {
    credential: RemoteCredential,
    settings: SshSettings,
}

impl SshChannel {
    /// Create a channel; nothing connects until a session opens
    pub fn new(credential: RemoteCredential, settings: SshSettings) -> Self {
        Self {
            credential,
            settings,
        }
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn open(&self) -> Result<Box<dyn RemoteSession>, ChannelError> {
        let credential = self.credential.clone();
        let timeout = self.settings.connect_timeout;

        let session = tokio::task::spawn_blocking(move || connect(&credential, timeout))
            .await
            .map_err(|e| ChannelError::Session(format!("connect task failed: {}", e)))??;

        log::debug!("Opened SSH session to {}", self.describe());

        Ok(Box::new(SshSession {
            session: Arc::new(Mutex::new(session)),
            encoding: self.settings.encoding,
        }))
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.credential.principal, self.credential.target())
    }
}

fn connect(credential: &RemoteCredential, timeout: Duration) -> Result<Session, ChannelError> {
    let target = credential.target();
    let connect_error = |message: String| ChannelError::Connect {
        target: target.clone(),
        message,
    };

    let addr = (credential.host.as_str(), credential.port)
        .to_socket_addrs()
        .map_err(|e| connect_error(e.to_string()))?
        .next()
        .ok_or_else(|| connect_error("host name did not resolve".to_string()))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| connect_error(e.to_string()))?;

    let mut session = Session::new().map_err(|e| connect_error(e.to_string()))?;
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| connect_error(e.to_string()))?;

    let authenticated = session
        .userauth_password(&credential.principal, credential.secret())
        .is_ok()
        && session.authenticated();
    if !authenticated {
        return Err(ChannelError::Authentication {
            user: credential.principal.clone(),
            target,
        });
    }

    // Tools may run for hours; only the connect phase is bounded
    session.set_timeout(0);
    Ok(session)
}

fn session_error(e: ssh2::Error) -> ChannelError {
    ChannelError::Session(e.to_string())
}

struct SshSession {
    session: Arc<Mutex<Session>>,
    encoding: &'static Encoding,
}

impl SshSession {
    /// Run `f` on a blocking thread with the session locked
    async fn blocking<T, F>(&self, f: F) -> Result<T, ChannelError>
    where
        F: FnOnce(&Session) -> Result<T, ChannelError> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let guard = session
                .lock()
                .map_err(|_| ChannelError::Session("session lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| ChannelError::Session(format!("blocking task failed: {}", e)))?
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(
        &mut self,
        command: &str,
        output: mpsc::UnboundedSender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<ExitStatus, ChannelError> {
        let command = command.to_string();
        let encoding = self.encoding;
        self.blocking(move |session| exec_blocking(session, &command, encoding, &output, &cancel))
            .await
    }

    async fn read_dir(&mut self, path: &str) -> Result<Vec<DirEntry>, ChannelError> {
        let path = path.to_string();
        self.blocking(move |session| {
            let sftp = session.sftp().map_err(session_error)?;
            let entries = sftp
                .readdir(Path::new(&path))
                .map_err(|e| ChannelError::path(&path, e))?;

            Ok(entries
                .into_iter()
                .filter_map(|(entry_path, stat)| {
                    let name = entry_path.file_name()?.to_string_lossy().into_owned();
                    Some(DirEntry {
                        name,
                        size: stat.size.unwrap_or(0),
                        modified: stat
                            .mtime
                            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
                        permissions: stat.perm.unwrap_or(0),
                        is_directory: stat.is_dir(),
                    })
                })
                .collect())
        })
        .await
    }

    async fn stat(&mut self, path: &str) -> Result<PathStat, ChannelError> {
        let path = path.to_string();
        self.blocking(move |session| {
            let sftp = session.sftp().map_err(session_error)?;
            // Any stat failure is reported as "does not exist"
            Ok(match sftp.stat(Path::new(&path)) {
                Ok(stat) => PathStat {
                    exists: true,
                    is_directory: stat.is_dir(),
                },
                Err(_) => PathStat::default(),
            })
        })
        .await
    }

    async fn read_file(&mut self, path: &str) -> Result<Vec<u8>, ChannelError> {
        let path = path.to_string();
        self.blocking(move |session| {
            let sftp = session.sftp().map_err(session_error)?;
            let mut file = sftp
                .open(Path::new(&path))
                .map_err(|e| ChannelError::path(&path, e))?;
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)
                .map_err(|e| ChannelError::path(&path, e))?;
            Ok(bytes)
        })
        .await
    }

    async fn write_file(&mut self, path: &str, bytes: Vec<u8>) -> Result<(), ChannelError> {
        let path = path.to_string();
        self.blocking(move |session| {
            let sftp = session.sftp().map_err(session_error)?;
            let mut file = sftp
                .create(Path::new(&path))
                .map_err(|e| ChannelError::path(&path, e))?;
            file.write_all(&bytes)
                .map_err(|e| ChannelError::path(&path, e))
        })
        .await
    }

    async fn remove_file(&mut self, path: &str) -> Result<(), ChannelError> {
        let path = path.to_string();
        self.blocking(move |session| {
            let sftp = session.sftp().map_err(session_error)?;
            sftp.unlink(Path::new(&path))
                .map_err(|e| ChannelError::path(&path, e))
        })
        .await
    }

    async fn close(self: Box<Self>) {
        let result = self
            .blocking(|session| {
                session
                    .disconnect(None, "session closed", None)
                    .map_err(session_error)
            })
            .await;
        if let Err(e) = result {
            log::debug!("SSH disconnect failed: {}", e);
        }
    }
}

fn exec_blocking(
    session: &Session,
    command: &str,
    encoding: &'static Encoding,
    output: &mpsc::UnboundedSender<OutputChunk>,
    cancel: &CancellationToken,
) -> Result<ExitStatus, ChannelError> {
    let mut channel = session.channel_session().map_err(session_error)?;
    channel.exec(command).map_err(session_error)?;

    session.set_blocking(false);
    let pumped = pump_output(&mut channel, encoding, output, cancel);
    session.set_blocking(true);
    pumped?;

    channel.wait_close().map_err(session_error)?;
    let code = channel.exit_status().map_err(session_error)?;
    let signal = channel.exit_signal().map_err(session_error)?.exit_signal;

    Ok(ExitStatus {
        code: if signal.is_some() { None } else { Some(code) },
        signal,
    })
}

/// Poll stdout and stderr until EOF, forwarding decoded text
fn pump_output(
    channel: &mut Channel,
    encoding: &'static Encoding,
    output: &mpsc::UnboundedSender<OutputChunk>,
    cancel: &CancellationToken,
) -> Result<(), ChannelError> {
    let mut stdout = TextDecoder::new(encoding);
    let mut stderr = TextDecoder::new(encoding);
    let mut buf = vec![0u8; READ_BUFFER];

    loop {
        if cancel.is_cancelled() {
            let _ = channel.close();
            return Err(ChannelError::Cancelled);
        }

        let mut idle = true;

        if let Some(n) = read_available(channel, &mut buf)? {
            idle = false;
            send(output, OutputChunk::Stdout(stdout.decode(&buf[..n])));
        }
        if let Some(n) = read_available(&mut channel.stderr(), &mut buf)? {
            idle = false;
            send(output, OutputChunk::Stderr(stderr.decode(&buf[..n])));
        }

        if idle {
            if channel.eof() {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    send(output, OutputChunk::Stdout(stdout.finish()));
    send(output, OutputChunk::Stderr(stderr.finish()));
    Ok(())
}

fn read_available(reader: &mut impl Read, buf: &mut [u8]) -> Result<Option<usize>, ChannelError> {
    match reader.read(buf) {
        Ok(0) => Ok(None),
        Ok(n) => Ok(Some(n)),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(ChannelError::Session(e.to_string())),
    }
}

fn send(output: &mpsc::UnboundedSender<OutputChunk>, chunk: OutputChunk) {
    if !chunk.text().is_empty() {
        let _ = output.send(chunk);
    }
}
