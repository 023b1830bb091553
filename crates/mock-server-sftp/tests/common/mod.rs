//! Shared fixtures for the integration tests

#![allow(dead_code)]

use mock_server_sftp::{Config, Connection, Server};
use russh::keys::ssh_key::LineEnding;
use russh::keys::{Algorithm, PrivateKey};
use std::net::SocketAddr;
use std::path::Path;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "testpass";

/// Write a fresh Ed25519 host key to `<root>/ssh/id_rsa_mockapi`
pub fn write_host_key(root: &Path) {
    let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
    let pem = key.to_openssh(LineEnding::LF).unwrap();

    std::fs::create_dir_all(root.join("ssh")).unwrap();
    std::fs::write(root.join("ssh").join("id_rsa_mockapi"), pem.as_bytes()).unwrap();
}

pub fn test_config(root: &Path) -> Config {
    Config {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        root_dir: root.to_path_buf(),
        ..Config::default()
    }
}

/// Gateway running on an ephemeral port over a temporary root
pub struct TestServer {
    pub addr: SocketAddr,
    pub temp: TempDir,
    task: JoinHandle<mock_server_sftp::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let temp = TempDir::new().unwrap();
        write_host_key(temp.path());
        Self::start_with(temp, |server| server).await
    }

    pub async fn start_with<F>(temp: TempDir, customize: F) -> Self
    where
        F: FnOnce(Server) -> Server,
    {
        let server = customize(Server::new(test_config(temp.path())).await.unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(server.serve(listener));

        Self { addr, temp, task }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub async fn connect(&self) -> Connection {
        Connection::connect(self.addr, "testuser", PASSWORD).await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
