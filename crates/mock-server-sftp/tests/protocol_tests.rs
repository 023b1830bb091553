//! Router behavior at the packet level, in-process over a duplex pipe

use bytes::BufMut;
use mock_server_sftp::protocol::{
    MessageType, RequestPacket, ResponsePacket, StatusCode, read_packet, write_packet,
};
use mock_server_sftp::router::Router;
use mock_server_sftp::{Error, Handlers, SftpClient, VirtualFs};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

const MAX_PACKET: u32 = 64 * 1024;

fn spawn_router(temp: &TempDir) -> (DuplexStream, JoinHandle<mock_server_sftp::Result<()>>) {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let handlers = Handlers::from_vfs(Arc::new(VirtualFs::new(temp.path())));
    let task = tokio::spawn(Router::new(handlers, MAX_PACKET).serve(server));
    (client, task)
}

async fn reply(stream: &mut DuplexStream) -> ResponsePacket {
    let body = read_packet(stream, MAX_PACKET).await.unwrap().unwrap();
    ResponsePacket::decode(&body).unwrap()
}

#[tokio::test]
async fn test_first_packet_must_be_init() {
    let temp = TempDir::new().unwrap();
    let (mut client, task) = spawn_router(&temp);

    let stat = RequestPacket::Stat {
        id: 1,
        path: "/".into(),
    };
    write_packet(&mut client, &stat.encode()).await.unwrap();

    assert!(matches!(task.await.unwrap(), Err(Error::Protocol(_))));
}

#[tokio::test]
async fn test_close_before_init_is_clean() {
    let temp = TempDir::new().unwrap();
    let (client, task) = spawn_router(&temp);
    drop(client);

    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_unsupported_messages_keep_session() {
    let temp = TempDir::new().unwrap();
    let (client, task) = spawn_router(&temp);
    let mut sftp = SftpClient::init(client).await.unwrap();

    for kind in [MessageType::Readlink as u8, MessageType::Extended as u8, 77] {
        let id = sftp.request_id();
        let response = sftp.raw(RequestPacket::Unsupported { id, kind }).await.unwrap();
        assert_eq!(response, ResponsePacket::status(id, StatusCode::OpUnsupported));
    }

    sftp.write("/still-alive", b"yes").await.unwrap();
    assert_eq!(sftp.read("/still-alive").await.unwrap(), b"yes");

    drop(sftp);
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_truncated_request_gets_bad_message() {
    let temp = TempDir::new().unwrap();
    let (mut client, _task) = spawn_router(&temp);

    write_packet(&mut client, &RequestPacket::Init { version: 3 }.encode()).await.unwrap();
    assert_eq!(reply(&mut client).await, ResponsePacket::Version { version: 3 });

    let mut body = bytes::BytesMut::new();
    body.put_u8(MessageType::Open as u8);
    body.put_u32(42);
    body.put_u32(1_000); // string length with no string behind it
    write_packet(&mut client, &body).await.unwrap();

    assert!(matches!(
        reply(&mut client).await,
        ResponsePacket::Status {
            id: 42,
            code: StatusCode::BadMessage,
            ..
        }
    ));
}

#[tokio::test]
async fn test_oversized_packet_ends_session() {
    let temp = TempDir::new().unwrap();
    let (mut client, task) = spawn_router(&temp);

    write_packet(&mut client, &RequestPacket::Init { version: 3 }.encode()).await.unwrap();
    reply(&mut client).await;

    let huge = RequestPacket::Write {
        id: 1,
        handle: b"0".to_vec(),
        offset: 0,
        data: vec![0u8; MAX_PACKET as usize],
    };
    // The router may hang up before the body is consumed.
    let _ = write_packet(&mut client, &huge.encode()).await;

    assert!(matches!(task.await.unwrap(), Err(Error::Protocol(_))));
}

#[tokio::test]
async fn test_unknown_handle_is_failure() {
    let temp = TempDir::new().unwrap();
    let (client, _task) = spawn_router(&temp);
    let mut sftp = SftpClient::init(client).await.unwrap();

    let id = sftp.request_id();
    let response = sftp
        .raw(RequestPacket::Read {
            id,
            handle: b"nope".to_vec(),
            offset: 0,
            len: 16,
        })
        .await
        .unwrap();
    assert!(matches!(response, ResponsePacket::Status { code, .. } if code == StatusCode::Failure));
}
