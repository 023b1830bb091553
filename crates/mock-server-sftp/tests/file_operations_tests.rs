//! File operation tests over a real SSH connection

mod common;

use common::TestServer;
use mock_server_sftp::Error;
use std::collections::HashSet;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_write_list_read_remove() {
    let server = TestServer::start().await;
    let conn = server.connect().await;
    let mut sftp = conn.open_sftp().await.unwrap();

    let listing = sftp.list("/").await.unwrap();
    let names: Vec<&str> = listing.iter().map(|e| e.filename.as_str()).collect();
    assert_eq!(names, ["ssh"]);

    sftp.write("/a.txt", b"hello").await.unwrap();

    let listing = sftp.list("/").await.unwrap();
    let entry = listing.iter().find(|e| e.filename == "a.txt").unwrap();
    assert_eq!(entry.attrs.size, Some(5));
    assert!(entry.longname.starts_with("-rw"));
    assert!(entry.longname.ends_with("a.txt"));

    assert_eq!(sftp.read("/a.txt").await.unwrap(), b"hello");
    assert_eq!(std::fs::read(server.root().join("a.txt")).unwrap(), b"hello");

    sftp.remove("/a.txt").await.unwrap();
    assert!(matches!(sftp.read("/a.txt").await, Err(Error::FileNotFound(_))));

    conn.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_overwrite_truncates() {
    let server = TestServer::start().await;
    let conn = server.connect().await;
    let mut sftp = conn.open_sftp().await.unwrap();

    sftp.write("/f", b"a much longer first version").await.unwrap();
    sftp.write("/f", b"v2").await.unwrap();
    assert_eq!(sftp.read("/f").await.unwrap(), b"v2");
}

#[tokio::test]
async fn test_stat_matches_filesystem() {
    let server = TestServer::start().await;
    std::fs::write(server.root().join("data.bin"), vec![7u8; 1234]).unwrap();
    std::fs::create_dir(server.root().join("dir")).unwrap();

    let conn = server.connect().await;
    let mut sftp = conn.open_sftp().await.unwrap();

    let attrs = sftp.stat("/data.bin").await.unwrap();
    let metadata = std::fs::metadata(server.root().join("data.bin")).unwrap();
    assert_eq!(attrs.size, Some(metadata.len()));
    assert!(!attrs.is_dir());

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        assert_eq!(attrs.permissions, Some(metadata.mode()));
        assert_eq!(attrs.mtime, u32::try_from(metadata.mtime()).ok());
    }

    assert_eq!(sftp.lstat("/data.bin").await.unwrap(), attrs);
    assert!(sftp.stat("/dir").await.unwrap().is_dir());

    assert!(matches!(sftp.stat("/missing").await, Err(Error::FileNotFound(_))));
    assert!(matches!(sftp.lstat("/missing").await, Err(Error::FileNotFound(_))));
}

#[tokio::test]
async fn test_mkdir_and_recursive_rmdir() {
    let server = TestServer::start().await;
    let conn = server.connect().await;
    let mut sftp = conn.open_sftp().await.unwrap();

    sftp.mkdir("/d").await.unwrap();
    sftp.mkdir("/d/e").await.unwrap();
    sftp.write("/d/f", b"x").await.unwrap();
    sftp.write("/d/e/g", b"y").await.unwrap();
    assert!(sftp.mkdir("/d").await.is_err());

    sftp.rmdir("/d").await.unwrap();
    assert!(!server.root().join("d").exists());
    assert!(matches!(sftp.rmdir("/d").await, Err(Error::FileNotFound(_))));
}

#[tokio::test]
async fn test_unimplemented_commands_change_nothing() {
    let server = TestServer::start().await;
    let conn = server.connect().await;
    let mut sftp = conn.open_sftp().await.unwrap();

    sftp.write("/a", b"keep").await.unwrap();
    let before = sftp.stat("/a").await.unwrap();

    sftp.rename("/a", "/b").await.unwrap();
    assert!(server.root().join("a").exists());
    assert!(!server.root().join("b").exists());

    let attrs = mock_server_sftp::protocol::FileAttrs {
        permissions: Some(0o100_600),
        ..before.clone()
    };
    sftp.setstat("/a", attrs).await.unwrap();
    assert_eq!(sftp.stat("/a").await.unwrap(), before);
}

#[tokio::test]
async fn test_realpath_is_lexical() {
    let server = TestServer::start().await;
    let conn = server.connect().await;
    let mut sftp = conn.open_sftp().await.unwrap();

    assert_eq!(sftp.realpath(".").await.unwrap(), "/");
    assert_eq!(sftp.realpath("").await.unwrap(), "/");
    assert_eq!(sftp.realpath("/x/../y/./z").await.unwrap(), "/y/z");
    assert_eq!(sftp.realpath("/../..").await.unwrap(), "/");
}

#[tokio::test]
async fn test_directory_listing_pages() {
    let server = TestServer::start().await;
    let dir = server.root().join("many");
    std::fs::create_dir(&dir).unwrap();
    for i in 0..250 {
        std::fs::write(dir.join(format!("file-{i:03}")), b"").unwrap();
    }

    let conn = server.connect().await;
    let mut sftp = conn.open_sftp().await.unwrap();

    let pages = sftp.list_pages("/many").await.unwrap();
    let sizes: Vec<usize> = pages.iter().map(Vec::len).collect();
    assert_eq!(sizes, [100, 100, 50]);

    let names: Vec<String> = pages.into_iter().flatten().map(|e| e.filename).collect();
    let unique: HashSet<&String> = names.iter().collect();
    assert_eq!(unique.len(), 250);
    assert_eq!(names.first().map(String::as_str), Some("file-000"));
    assert_eq!(names.last().map(String::as_str), Some("file-249"));

    assert!(matches!(sftp.list("/nope").await, Err(Error::FileNotFound(_))));
}

#[tokio::test]
async fn test_channels_served_concurrently() {
    let server = TestServer::start().await;
    let conn = server.connect().await;

    let mut tasks = JoinSet::new();
    for i in 0..4 {
        let mut sftp = conn.open_sftp().await.unwrap();
        tasks.spawn(async move {
            let path = format!("/chan-{i}.txt");
            let body = format!("channel {i}").into_bytes();
            sftp.write(&path, &body).await.unwrap();
            assert_eq!(sftp.read(&path).await.unwrap(), body);
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    for i in 0..4 {
        assert!(server.root().join(format!("chan-{i}.txt")).exists());
    }
}

#[tokio::test]
async fn test_concurrent_connections() {
    let server = TestServer::start().await;
    let addr = server.addr;

    let mut tasks = JoinSet::new();
    for i in 0..5 {
        tasks.spawn(async move {
            let conn = mock_server_sftp::Connection::connect(addr, "testuser", "valid-token")
                .await
                .unwrap();
            let mut sftp = conn.open_sftp().await.unwrap();
            sftp.write(&format!("/conn-{i}"), b"x").await.unwrap();
            sftp.stat(&format!("/conn-{i}")).await.unwrap().size
        });
    }

    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap(), Some(1));
    }
}
