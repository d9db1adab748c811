//! Remote port forwarding for workers.
//!
//! A worker asks for a `tcpip-forward`; the gateway binds an ephemeral port
//! and relays each accepted TCP connection over a fresh `forwarded-tcpip`
//! channel back to the worker.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use russh::server::{Handle, Msg};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, warn};

use super::error::{GatewayError, GatewayResult};

/// Opens the worker side of a forwarded connection.
#[async_trait]
pub trait ForwardTarget: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn open(&self, originator: SocketAddr) -> GatewayResult<Self::Stream>;
}

/// Forward target backed by an SSH session.
pub struct SshForwardTarget {
    handle: Handle,
    /// Address and port the worker asked to have forwarded
    address: String,
    port: u32,
}

impl SshForwardTarget {
    pub fn new(handle: Handle, address: impl Into<String>, port: u32) -> Self {
        Self {
            handle,
            address: address.into(),
            port,
        }
    }
}

#[async_trait]
impl ForwardTarget for SshForwardTarget {
    type Stream = russh::ChannelStream<Msg>;

    async fn open(&self, originator: SocketAddr) -> GatewayResult<Self::Stream> {
        let channel = self
            .handle
            .channel_open_forwarded_tcpip(
                self.address.clone(),
                self.port,
                originator.ip().to_string(),
                u32::from(originator.port()),
            )
            .await?;
        Ok(channel.into_stream())
    }
}

/// A bound forward. Dropping it stops accepting and tears down its relays.
#[derive(Debug)]
pub struct ForwardListener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl ForwardListener {
    /// Relay connections accepted on `listener` to `target` until `cancel`
    /// fires.
    pub fn start<T: ForwardTarget>(
        listener: TcpListener,
        target: T,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> GatewayResult<Self> {
        let local_addr = listener.local_addr()?;

        let target = Arc::new(target);
        let accept_cancel = cancel.clone();
        let relay_tracker = tracker.clone();
        tracker.spawn(async move {
            accept_loop(listener, target, accept_cancel, relay_tracker).await;
        });

        debug!(addr = %local_addr, "Forward listener started");
        Ok(Self { local_addr, cancel })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ForwardListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop<T: ForwardTarget>(
    listener: TcpListener,
    target: Arc<T>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let (stream, originator) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept forwarded connection");
                    continue;
                }
            },
        };

        let target = Arc::clone(&target);
        let relay_cancel = cancel.clone();
        tracker.spawn(async move {
            if let Err(e) = relay(stream, originator, target.as_ref(), relay_cancel).await {
                debug!(originator = %originator, error = %e, "Forwarded connection ended with error");
            }
        });
    }
}

async fn relay<T: ForwardTarget>(
    mut inbound: TcpStream,
    originator: SocketAddr,
    target: &T,
    cancel: CancellationToken,
) -> Result<(), GatewayError> {
    let mut outbound = target.open(originator).await?;

    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        copied = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => {
            let (up, down) = copied?;
            debug!(originator = %originator, bytes_up = up, bytes_down = down, "Forwarded connection closed");
            Ok(())
        }
    }
}
