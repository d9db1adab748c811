// These modules are used by integration tests
#![allow(dead_code)]

pub mod fixtures;
pub mod mock_control_plane;
pub mod ssh_client;

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use tempfile::TempDir;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use worker_gateway::{
    auth::SessionRegistry,
    config::{GatewayConfig, GatewayConfigBuilder},
    gateway::GatewayResult,
    server::build_gateway,
};

/// Key material written to a temporary directory.
pub struct KeyFiles {
    pub dir: TempDir,
    pub host_key: PathBuf,
    pub signing_key: PathBuf,
    pub global_keys: PathBuf,
    pub ops_keys: PathBuf,
}

impl KeyFiles {
    pub fn write() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, contents: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path
        };

        let host_key = write("host_key", fixtures::HOST_PRIVATE_KEY);
        let signing_key = write("signing_key.pem", fixtures::SIGNING_PRIVATE_PEM);
        let global_keys = write(
            "authorized_keys",
            &format!("# operators\n{}\n", fixtures::GLOBAL_PUBLIC_KEY),
        );
        let ops_keys = write("ops_keys", &format!("{}\n", fixtures::OPS_PUBLIC_KEY));

        Self {
            dir,
            host_key,
            signing_key,
            global_keys,
            ops_keys,
        }
    }

    /// Config trusting the global key and the `ops` team key.
    pub fn config(&self, control_plane_urls: Vec<String>) -> GatewayConfig {
        GatewayConfigBuilder::new()
            .bind("127.0.0.1", 0)
            .peer_address("10.0.0.1")
            .forward_bind_ip("127.0.0.1")
            .host_key(&self.host_key)
            .session_signing_key(&self.signing_key)
            .authorized_keys(&self.global_keys)
            .team_authorized_keys("ops", &self.ops_keys)
            .control_plane_urls(control_plane_urls)
            .heartbeat_interval_secs(2)
            .recovery_interval_ms(100)
            .request_timeout_secs(2)
            .shutdown_grace_period_secs(5)
            .build()
            .unwrap()
    }
}

/// A gateway serving on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub sessions: Arc<SessionRegistry>,
    pub shutdown: CancellationToken,
    serve: Option<JoinHandle<GatewayResult<()>>>,
    _keys: KeyFiles,
}

impl TestGateway {
    pub async fn start(control_plane_urls: Vec<String>) -> Self {
        let keys = KeyFiles::write();
        let config = keys.config(control_plane_urls);

        let shutdown = CancellationToken::new();
        let gateway = build_gateway(&config, shutdown.clone()).unwrap();
        let sessions = Arc::clone(&gateway.context().sessions);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serve = tokio::spawn(gateway.serve(listener));

        Self {
            addr,
            sessions,
            shutdown,
            serve: Some(serve),
            _keys: keys,
        }
    }

    /// Trigger shutdown and wait for the gateway to drain.
    pub async fn stop(&mut self) -> GatewayResult<()> {
        self.shutdown.cancel();
        match self.serve.take() {
            Some(serve) => tokio::time::timeout(Duration::from_secs(10), serve)
                .await
                .expect("gateway did not drain in time")
                .unwrap(),
            None => Ok(()),
        }
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
