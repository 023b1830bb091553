//! Authentication, channel admission and subsystem negotiation

mod common;

use common::{TestServer, test_config, write_host_key};
use mock_server_core::{CoreError, CredentialGate, Identity};
use mock_server_sftp::client::{bind_sftp, wait_for_reply};
use mock_server_sftp::{Connection, Error, Server};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_both_secrets_accepted() {
    let server = TestServer::start().await;

    for secret in ["testpass", "valid-token"] {
        let conn = Connection::connect(server.addr, "anyone", secret).await.unwrap();
        let mut sftp = conn.open_sftp().await.unwrap();
        assert_eq!(sftp.realpath("/").await.unwrap(), "/");
        conn.disconnect().await.unwrap();
    }
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let server = TestServer::start().await;

    for secret in ["", "wrong", "TESTPASS", "testpass "] {
        let result = Connection::connect(server.addr, "testuser", secret).await;
        assert!(matches!(result, Err(Error::Authentication(_))), "secret {secret:?}");
    }
}

#[tokio::test]
async fn test_direct_tcpip_rejected_connection_survives() {
    let server = TestServer::start().await;
    let conn = server.connect().await;

    let result = conn.open_direct_tcpip("127.0.0.1", 22).await;
    assert!(matches!(result, Err(Error::ChannelRejected(_))));

    let mut sftp = conn.open_sftp().await.unwrap();
    sftp.write("/after-reject", b"ok").await.unwrap();
    assert_eq!(sftp.read("/after-reject").await.unwrap(), b"ok");
}

#[tokio::test]
async fn test_unknown_subsystem_refused() {
    let server = TestServer::start().await;
    let conn = server.connect().await;

    assert!(!conn.request_subsystem("netconf").await.unwrap());
    assert!(!conn.request_subsystem("SFTP").await.unwrap());
    assert!(conn.request_subsystem("sftp").await.unwrap());

    let mut sftp = conn.open_sftp().await.unwrap();
    assert!(sftp.list("/").await.is_ok());
}

#[tokio::test]
async fn test_idle_channel_flood_does_not_stall_connection() {
    let server = TestServer::start().await;
    let conn = server.connect().await;

    let idle = conn.open_session().await.unwrap();
    for i in 0..300 {
        idle.set_env(false, format!("VAR_{i}"), "value").await.unwrap();
    }
    idle.data(&b"bytes before any subsystem"[..]).await.unwrap();

    let mut sftp = timeout(REPLY_TIMEOUT, conn.open_sftp()).await.unwrap().unwrap();
    sftp.write("/after-flood", b"ok").await.unwrap();
    assert_eq!(sftp.read("/after-flood").await.unwrap(), b"ok");

    // The flooded channel itself can still be bound and served.
    let mut late = timeout(REPLY_TIMEOUT, bind_sftp(idle)).await.unwrap().unwrap();
    assert_eq!(late.read("/after-flood").await.unwrap(), b"ok");
}

#[tokio::test]
async fn test_other_channel_requests_answered_negatively() {
    let server = TestServer::start().await;
    let conn = server.connect().await;
    let mut channel = conn.open_session().await.unwrap();

    channel
        .request_x11(true, false, "MIT-MAGIC-COOKIE-1", "0123456789abcdef", 0)
        .await
        .unwrap();
    assert!(!timeout(REPLY_TIMEOUT, wait_for_reply(&mut channel)).await.unwrap());

    channel.exec(true, "ls").await.unwrap();
    assert!(!timeout(REPLY_TIMEOUT, wait_for_reply(&mut channel)).await.unwrap());

    channel.window_change(80, 24, 0, 0).await.unwrap();

    // Refusals leave the channel negotiable.
    let mut sftp = timeout(REPLY_TIMEOUT, bind_sftp(channel)).await.unwrap().unwrap();
    assert_eq!(sftp.realpath("/").await.unwrap(), "/");
}

#[tokio::test]
async fn test_custom_credential_gate() {
    struct OnlyAlt;

    impl CredentialGate for OnlyAlt {
        fn validate(&self, secret: &str) -> mock_server_core::Result<Identity> {
            if secret == "alt" {
                Ok(Identity::new("alt", "alt@example.com", ["user"]))
            } else {
                Err(CoreError::InvalidCredential)
            }
        }
    }

    let temp = TempDir::new().unwrap();
    write_host_key(temp.path());
    let server = TestServer::start_with(temp, |s| s.with_credential_gate(Arc::new(OnlyAlt))).await;

    assert!(Connection::connect(server.addr, "u", "alt").await.is_ok());
    assert!(Connection::connect(server.addr, "u", "testpass").await.is_err());
}

#[tokio::test]
async fn test_missing_host_key_is_fatal() {
    let temp = TempDir::new().unwrap();
    let result = Server::new(test_config(temp.path())).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_unparseable_host_key_is_fatal() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir(temp.path().join("ssh")).unwrap();
    std::fs::write(temp.path().join("ssh/id_rsa_mockapi"), b"not a key").unwrap();

    let result = Server::new(test_config(temp.path())).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_missing_root_is_fatal() {
    let temp = TempDir::new().unwrap();
    let result = Server::new(test_config(&temp.path().join("absent"))).await;
    assert!(matches!(result, Err(Error::Config(_))));
}
