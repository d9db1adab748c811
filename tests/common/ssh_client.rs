// SSH client helpers for integration tests
#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use russh::{
    client::{self, Handle, Msg},
    Channel, ChannelMsg, Disconnect,
};
use russh_keys::key;

/// Client that trusts any host key.
pub struct TestClient;

#[async_trait]
impl client::Handler for TestClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Connect to `addr` and try to authenticate with `private_key`
/// (OpenSSH format). Returns the handle and whether the key was accepted.
pub async fn connect(addr: SocketAddr, private_key: &str) -> (Handle<TestClient>, bool) {
    let config = Arc::new(client::Config::default());
    let mut handle = client::connect(config, addr, TestClient).await.unwrap();
    let key = russh_keys::decode_secret_key(private_key, None).unwrap();
    let authenticated = handle
        .authenticate_publickey("worker", Arc::new(key))
        .await
        .unwrap();
    (handle, authenticated)
}

/// Run `command` and stream `stdin` followed by EOF.
pub async fn exec(handle: &Handle<TestClient>, command: &str, stdin: &[u8]) -> Channel<Msg> {
    let channel = handle.channel_open_session().await.unwrap();
    channel.exec(true, command).await.unwrap();
    channel.data(stdin).await.unwrap();
    channel.eof().await.unwrap();
    channel
}

/// Open a `register-worker` channel carrying `spec`.
pub async fn register_worker(handle: &Handle<TestClient>, spec: &serde_json::Value) -> Channel<Msg> {
    exec(handle, "register-worker", &serde_json::to_vec(spec).unwrap()).await
}

/// Collect stderr and exit status until the server closes the channel.
pub async fn read_outcome(channel: &mut Channel<Msg>) -> (String, Option<u32>) {
    let mut stderr = Vec::new();
    let mut status = None;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }
    })
    .await;

    (String::from_utf8_lossy(&stderr).into_owned(), status)
}

pub async fn disconnect(handle: &Handle<TestClient>) {
    let _ = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await;
}
