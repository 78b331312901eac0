//! Run commands on a remote VM over SSH.
//!
//! libssh2 is blocking, so one whole run (connect, auth, every command)
//! happens on a blocking thread over a single session. The thread checks a
//! [`RunBudget`] between steps and while waiting on output, so a run whose
//! caller gave up stops instead of continuing in the background.

use async_trait::async_trait;
use ssh2::{Channel, Session};
use std::fmt;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{skip_remaining, CommandExecutor, ExecutionError};
use crate::types::{CommandOutcome, ExecutionReport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Credentials for the target.
#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    /// Private key file, optional passphrase
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::KeyFile { path, .. } => f.debug_struct("KeyFile").field("path", path).finish(),
        }
    }
}

/// Fixed remediation target.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: SshAuth,
}

impl SshTarget {
    fn identity(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Executes commands on an [`SshTarget`].
#[derive(Debug, Clone)]
pub struct SshExecutor {
    target: SshTarget,
    run_timeout: Duration,
}

impl SshExecutor {
    /// `run_timeout` bounds one whole run: connect, auth and every command.
    #[must_use]
    pub fn new(target: SshTarget, run_timeout: Duration) -> Self {
        Self {
            target,
            run_timeout,
        }
    }
}

/// Deadline and cancellation shared between the async caller and the
/// blocking worker.
#[derive(Debug)]
struct RunBudget {
    total: Duration,
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl RunBudget {
    fn new(total: Duration) -> Self {
        Self {
            total,
            deadline: Instant::now() + total,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Time left, or `Timeout` once the deadline passed or the caller went away.
    fn remaining(&self) -> Result<Duration, ExecutionError> {
        let left = self.deadline.saturating_duration_since(Instant::now());
        if self.cancelled.load(Ordering::Acquire) || left.is_zero() {
            return Err(ExecutionError::Timeout {
                secs: self.total.as_secs(),
            });
        }
        Ok(left)
    }

    /// Bound the next blocking libssh2 call by the time left.
    fn arm(&self, session: &Session) -> Result<(), ExecutionError> {
        let left = self.remaining()?;
        // 0 means "no timeout" to libssh2
        session.set_timeout(u32::try_from(left.as_millis()).unwrap_or(u32::MAX).max(1));
        Ok(())
    }

    fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop(Arc::clone(&self.cancelled))
    }
}

/// Held by the `run` future; dropping it (completion or the caller's
/// timeout) tells the worker to stop.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

fn connect(target: &SshTarget, budget: &RunBudget) -> Result<Session, ExecutionError> {
    let identity = target.identity();
    let connect_err = |message: String| ExecutionError::Connect {
        target: identity.clone(),
        message,
    };

    let addr = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| connect_err(e.to_string()))?
        .next()
        .ok_or_else(|| connect_err("host did not resolve".to_string()))?;
    let connect_timeout = budget.remaining()?.min(CONNECT_TIMEOUT);
    let tcp = TcpStream::connect_timeout(&addr, connect_timeout)
        .map_err(|e| connect_err(e.to_string()))?;

    let mut session = Session::new().map_err(|e| connect_err(e.to_string()))?;
    session.set_tcp_stream(tcp);
    budget.arm(&session)?;
    session.handshake().map_err(|e| connect_err(e.to_string()))?;

    let auth_err = |e: ssh2::Error| ExecutionError::Auth {
        target: identity.clone(),
        message: e.to_string(),
    };
    match &target.auth {
        SshAuth::Password(password) => session
            .userauth_password(&target.user, password)
            .map_err(auth_err)?,
        SshAuth::KeyFile { path, passphrase } => session
            .userauth_pubkey_file(&target.user, None, path, passphrase.as_deref())
            .map_err(auth_err)?,
    }

    if !session.authenticated() {
        return Err(ExecutionError::Auth {
            target: identity,
            message: "server did not accept credentials".to_string(),
        });
    }
    Ok(session)
}

fn transport(e: impl fmt::Display) -> ExecutionError {
    ExecutionError::Transport(e.to_string())
}

/// Move whatever `stream` has ready into `sink`. `Ok(false)` when nothing
/// was ready.
fn drain(
    stream: &mut impl Read,
    sink: &mut Vec<u8>,
    buf: &mut [u8],
) -> Result<bool, ExecutionError> {
    match stream.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(false)
        }
        Err(e) => Err(transport(e)),
    }
}

/// Read stdout and stderr together until the remote side closes them.
///
/// Both streams are polled without blocking so a command that fills its
/// stderr window cannot stall while we wait on stdout.
fn collect_output(
    session: &Session,
    channel: &Channel,
    budget: &RunBudget,
) -> Result<(Vec<u8>, Vec<u8>), ExecutionError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 8192];

    session.set_blocking(false);
    let result = loop {
        let out = drain(&mut channel.stream(0), &mut stdout, &mut buf);
        let err = drain(&mut channel.stderr(), &mut stderr, &mut buf);
        match (out, err) {
            (Err(e), _) | (_, Err(e)) => break Err(e),
            (Ok(false), Ok(false)) if channel.eof() => break Ok(()),
            (Ok(false), Ok(false)) => {
                if let Err(e) = budget.remaining() {
                    break Err(e);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            _ => {}
        }
    };
    session.set_blocking(true);

    result.map(|()| (stdout, stderr))
}

fn exec(
    session: &Session,
    command: &str,
    budget: &RunBudget,
) -> Result<CommandOutcome, ExecutionError> {
    budget.arm(session)?;
    let mut channel = session.channel_session().map_err(transport)?;
    channel.exec(command).map_err(transport)?;

    let (stdout, stderr) = collect_output(session, &channel, budget)?;

    budget.arm(session)?;
    channel.wait_close().map_err(transport)?;
    let exit_status = channel.exit_status().map_err(transport)?;

    Ok(CommandOutcome {
        command: command.to_string(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status: Some(exit_status),
    })
}

fn run_blocking(
    target: &SshTarget,
    budget: &RunBudget,
    commands: &[String],
    halt_on_failure: bool,
) -> Result<ExecutionReport, ExecutionError> {
    budget.remaining()?;
    let session = connect(target, budget)?;
    info!(target = %target.identity(), commands = commands.len(), "SSH session established");

    let mut outcomes = Vec::with_capacity(commands.len());
    for (index, command) in commands.iter().enumerate() {
        if let Err(e) = budget.remaining() {
            warn!(completed = index, total = commands.len(), "SSH run out of time, stopping");
            let _ = session.disconnect(None, "remediation cancelled", None);
            return Err(e);
        }

        debug!(command = %command, "Running remote command");
        let outcome = exec(&session, command, budget)?;
        let failed = !outcome.succeeded();
        outcomes.push(outcome);

        if failed && halt_on_failure {
            warn!(command = %command, "Command failed, halting remaining steps");
            skip_remaining(&mut outcomes, commands, index + 1);
            break;
        }
    }

    let _ = session.disconnect(None, "remediation complete", None);
    Ok(ExecutionReport {
        target: target.identity(),
        outcomes,
    })
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    fn target(&self) -> String {
        self.target.identity()
    }

    async fn run(
        &self,
        commands: &[String],
        halt_on_failure: bool,
    ) -> Result<ExecutionReport, ExecutionError> {
        let target = self.target.clone();
        let commands = commands.to_vec();
        let budget = RunBudget::new(self.run_timeout);
        let _cancel = budget.cancel_on_drop();

        tokio::task::spawn_blocking(move || {
            run_blocking(&target, &budget, &commands, halt_on_failure)
        })
        .await
        .map_err(|e| ExecutionError::Transport(format!("ssh worker failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_debug_redacts_password() {
        let auth = SshAuth::Password("hunter2".to_string());
        assert_eq!(format!("{auth:?}"), "Password(<redacted>)");
    }

    #[tokio::test]
    async fn test_unreachable_target_is_connect_error() {
        let executor = SshExecutor::new(unreachable_target(), Duration::from_secs(2));
        assert_eq!(executor.target(), "azureuser@127.0.0.1:1");

        let err = executor.run(&["echo a".to_string()], true).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Connect { .. }));
    }

    fn unreachable_target() -> SshTarget {
        SshTarget {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "azureuser".to_string(),
            auth: SshAuth::Password("x".to_string()),
        }
    }

    #[test]
    fn test_dropping_run_cancels_budget() {
        let budget = RunBudget::new(Duration::from_secs(60));
        assert!(budget.remaining().is_ok());

        drop(budget.cancel_on_drop());
        assert!(matches!(
            budget.remaining(),
            Err(ExecutionError::Timeout { secs: 60 })
        ));
    }

    #[test]
    fn test_spent_budget_is_timeout() {
        let budget = RunBudget::new(Duration::ZERO);
        assert!(matches!(
            budget.remaining(),
            Err(ExecutionError::Timeout { secs: 0 })
        ));
    }

    #[test]
    fn test_cancelled_run_never_connects() {
        // Port 1 would be a Connect error if a connection were attempted
        let budget = RunBudget::new(Duration::from_secs(60));
        drop(budget.cancel_on_drop());

        let commands = ["reboot".to_string()];
        let err = run_blocking(&unreachable_target(), &budget, &commands, true).unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { .. }));
    }

    struct WouldBlockReader;

    impl Read for WouldBlockReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"))
        }
    }

    #[test]
    fn test_drain_keeps_non_utf8_output() {
        let raw = b"disk \xff\xfe full\n".to_vec();
        let mut reader = io::Cursor::new(raw.clone());
        let mut sink = Vec::new();
        let mut buf = [0u8; 4];

        while drain(&mut reader, &mut sink, &mut buf).unwrap() {}
        assert_eq!(sink, raw);

        let text = String::from_utf8_lossy(&sink);
        assert!(text.starts_with("disk "));
        assert!(text.ends_with(" full\n"));
        assert!(text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_drain_would_block_is_no_progress_and_errors_propagate() {
        let mut sink = Vec::new();
        let mut buf = [0u8; 16];
        assert!(!drain(&mut WouldBlockReader, &mut sink, &mut buf).unwrap());
        assert!(matches!(
            drain(&mut BrokenReader, &mut sink, &mut buf),
            Err(ExecutionError::Transport(m)) if m.contains("peer reset")
        ));
    }
}
