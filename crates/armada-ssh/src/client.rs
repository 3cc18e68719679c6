//! SSH client
//!
//! One authenticated session per logical command. Exit code 255 is the
//! `ssh` binary reporting a transport problem; everything else is the
//! remote command's own exit status. Classification into connection vs
//! authentication happens here, once, and nowhere else.

use crate::error::{Result, SshError};
use crate::runner::{CommandRunner, ProcessRunner, RawOutput};
use armada_core::{poll, retry_with_backoff};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Default login user for managed servers.
pub const DEFAULT_SSH_USER: &str = "root";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const SSH_READY_ATTEMPTS: u32 = 90;
const SSH_READY_INTERVAL: Duration = Duration::from_secs(2);

/// Output of a remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Remote execution client for one server.
#[derive(Clone)]
pub struct SshClient {
    host: String,
    user: String,
    key_path: String,
    port: u16,
    runner: Arc<dyn CommandRunner>,
}

impl SshClient {
    pub fn new(host: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: DEFAULT_SSH_USER.to_string(),
            key_path: key_path.into(),
            port: 22,
            runner: Arc::new(ProcessRunner),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Swap the process runner. Used by tests.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn base_args(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key_path.clone(),
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
        ]
    }

    pub(crate) fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Execute a remote command, raising on non-zero exit.
    pub async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let output = self.execute_unchecked(command).await?;
        if !output.success() {
            return Err(SshError::Command {
                command: command.to_string(),
                exit_code: output.exit_code,
                output: output.output,
            });
        }
        Ok(output)
    }

    /// Execute a remote command, returning non-zero exits as output
    /// instead of an error. Transport failures still raise.
    pub async fn execute_unchecked(&self, command: &str) -> Result<CommandOutput> {
        let mut args = self.base_args();
        args.push(self.destination());
        args.push("--".to_string());
        args.push(command.to_string());

        tracing::debug!(host = %self.host, %command, "executing remote command");
        let raw = self.runner.run("ssh", &args).await?;
        self.classify(raw)
    }

    /// Execute with exponential backoff over connection-class failures.
    ///
    /// Authentication and command failures are never retried.
    pub async fn execute_with_retry(&self, command: &str, retries: u32) -> Result<CommandOutput> {
        retry_with_backoff(retries, 2.0, SshError::is_retryable, || {
            self.execute(command)
        })
        .await
    }

    /// Block until the server accepts TCP connections on the SSH port.
    pub async fn wait_for_ssh(&self) -> Result<()> {
        let ip: IpAddr = self.host.parse().map_err(|_| SshError::Connection {
            host: self.host.clone(),
            message: "host is not an IP address".to_string(),
        })?;
        let addr = SocketAddr::new(ip, self.port);
        let what = format!("ssh on {addr}");

        poll(SSH_READY_ATTEMPTS, SSH_READY_INTERVAL, &what, || async {
            let connect = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await;
            Ok::<_, SshError>(match connect {
                Ok(Ok(_)) => Some(()),
                _ => None,
            })
        })
        .await?
    }

    /// Decide once what kind of failure this was.
    ///
    /// `ssh` reserves exit code 255 for its own failures; the stderr text
    /// distinguishes a rejected key from an unreachable host. This is the
    /// only place that text is ever inspected.
    fn classify(&self, raw: RawOutput) -> Result<CommandOutput> {
        let code = raw.code.unwrap_or(-1);

        if code == 255 {
            let stderr = raw.stderr.trim().to_string();
            if stderr.contains("Permission denied")
                || stderr.contains("Host key verification failed")
            {
                return Err(SshError::Authentication {
                    host: self.host.clone(),
                    message: stderr,
                });
            }
            return Err(SshError::Connection {
                host: self.host.clone(),
                message: stderr,
            });
        }

        let mut output = raw.stdout;
        if !raw.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&raw.stderr);
        }

        Ok(CommandOutput {
            output,
            exit_code: code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted runner: pops one canned outcome per call.
    struct ScriptedRunner {
        script: Mutex<Vec<RawOutput>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new(script: Vec<RawOutput>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, _program: &str, args: &[String]) -> Result<RawOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                panic!("scripted runner exhausted");
            }
            Ok(script.remove(0))
        }
    }

    fn ok(stdout: &str) -> RawOutput {
        RawOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn failing(code: i32, stderr: &str) -> RawOutput {
        RawOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn client(runner: Arc<ScriptedRunner>) -> SshClient {
        SshClient::new("203.0.113.10", "/tmp/id_ed25519").with_runner(runner)
    }

    #[tokio::test]
    async fn test_execute_success() {
        let runner = ScriptedRunner::new(vec![ok("hello\n")]);
        let output = client(runner).execute("echo hello").await.unwrap();
        assert_eq!(output.output, "hello\n");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_command_error() {
        let runner = ScriptedRunner::new(vec![failing(3, "boom")]);
        let err = client(runner).execute("false").await.unwrap_err();
        match err {
            SshError::Command {
                exit_code, output, ..
            } => {
                assert_eq!(exit_code, 3);
                assert!(output.contains("boom"));
            }
            other => panic!("expected Command error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unchecked_returns_nonzero_exit() {
        let runner = ScriptedRunner::new(vec![failing(3, "boom")]);
        let output = client(runner).execute_unchecked("false").await.unwrap();
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_255_with_permission_denied_is_authentication() {
        let runner = ScriptedRunner::new(vec![failing(
            255,
            "root@203.0.113.10: Permission denied (publickey).",
        )]);
        let err = client(runner).execute("id").await.unwrap_err();
        assert!(err.is_authentication());
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_255_otherwise_is_connection() {
        let runner = ScriptedRunner::new(vec![failing(
            255,
            "ssh: connect to host 203.0.113.10 port 22: Connection refused",
        )]);
        let err = client(runner).execute("id").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_connection_failures() {
        let runner = ScriptedRunner::new(vec![
            failing(255, "Connection refused"),
            failing(255, "Connection timed out"),
            ok("ready\n"),
        ]);
        let output = client(runner.clone())
            .execute_with_retry("uptime", 3)
            .await
            .unwrap();
        assert_eq!(output.output, "ready\n");
        assert_eq!(runner.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_never_touches_auth_failures() {
        let runner = ScriptedRunner::new(vec![failing(255, "Permission denied (publickey)")]);
        let err = client(runner.clone())
            .execute_with_retry("uptime", 5)
            .await
            .unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_command_goes_after_destination() {
        let runner = ScriptedRunner::new(vec![ok("")]);
        client(runner.clone()).execute("uptime").await.unwrap();

        let calls = runner.calls.lock().unwrap();
        let args = &calls[0];
        let dest_pos = args.iter().position(|a| a == "root@203.0.113.10").unwrap();
        assert_eq!(args[dest_pos + 1], "--");
        assert_eq!(args[dest_pos + 2], "uptime");
    }
}
