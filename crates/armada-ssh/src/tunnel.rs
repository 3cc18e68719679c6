//! Local port-forward tunnels
//!
//! `with_local_forward` opens `ssh -N -L` for the duration of a closure.
//! The tunnel process is owned by a kill-on-drop guard, so it is torn down
//! on success, error and early return alike.

use crate::client::SshClient;
use crate::error::{Result, SshError};
use armada_core::poll;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

const LISTENER_ATTEMPTS: u32 = 20;
const LISTENER_INTERVAL: Duration = Duration::from_millis(250);
const LISTENER_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Owns the tunnel child process; kills it when dropped.
struct TunnelGuard {
    child: Child,
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::warn!(error = %e, "failed to kill tunnel process");
        }
    }
}

/// Run `f` with a local TCP listener on `local_port` forwarded to
/// `remote_host:remote_port` through `client`'s server.
///
/// The forward target is resolved on the remote side, so `remote_host`
/// may be a cluster-internal address.
pub async fn with_local_forward<T, F, Fut>(
    client: &SshClient,
    local_port: u16,
    remote_host: &str,
    remote_port: u16,
    f: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut args = client.base_args();
    args.push("-N".to_string());
    args.push("-L".to_string());
    args.push(format!("{local_port}:{remote_host}:{remote_port}"));
    args.push(client.destination());

    tracing::debug!(
        host = %client.host(),
        local_port,
        %remote_host,
        remote_port,
        "opening local forward"
    );

    let child = Command::new("ssh")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SshError::Spawn {
            program: "ssh".to_string(),
            message: e.to_string(),
        })?;

    let mut guard = TunnelGuard { child };

    // The listener comes up asynchronously; probe it before handing
    // control to the closure.
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, local_port));
    let what = format!("tunnel listener on {addr}");
    let ready = poll(LISTENER_ATTEMPTS, LISTENER_INTERVAL, &what, || async {
        let connect =
            tokio::time::timeout(LISTENER_CONNECT_TIMEOUT, TcpStream::connect(addr)).await;
        Ok::<_, SshError>(match connect {
            Ok(Ok(_)) => Some(()),
            _ => None,
        })
    })
    .await;

    match ready {
        Ok(inner) => inner?,
        Err(wait_err) => {
            // Surface the ssh process's own complaint if it already died.
            if let Ok(Some(status)) = guard.child.try_wait() {
                return Err(SshError::Tunnel(format!(
                    "ssh forward process exited early with {status}"
                )));
            }
            return Err(wait_err.into());
        }
    }

    // Guard stays alive across f; dropping it afterwards kills the tunnel
    // on every exit path.
    let result = f().await;
    drop(guard);
    result
}
