//! Line source tests against real files

use bytes::Bytes;
use mqtt_stream::input::spawn_line_source;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

async fn open(temp_file: &NamedTempFile) -> tokio::fs::File {
    tokio::fs::File::open(temp_file.path()).await.unwrap()
}

#[tokio::test]
async fn test_reads_file_line_by_line() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"hello\r\nworld\n\n68656c6c6f\nno newline")
        .unwrap();

    let (mut lines, handle) =
        spawn_line_source(open(&temp_file).await, CancellationToken::new());

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(lines.next().await);
    }
    assert_eq!(
        received,
        vec![
            Bytes::from_static(b"hello"),
            Bytes::from_static(b"world"),
            Bytes::new(),
            Bytes::from_static(b"68656c6c6f"),
            Bytes::from_static(b"no newline"),
        ]
    );

    handle.await.unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(50), lines.next())
            .await
            .is_err(),
        "exhausted stream must not yield"
    );
}

#[tokio::test]
async fn test_binary_lines_pass_through() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"\x00\xff\xfe\n\x80abc\n").unwrap();

    let (mut lines, _handle) =
        spawn_line_source(open(&temp_file).await, CancellationToken::new());

    assert_eq!(lines.next().await, Bytes::from_static(b"\x00\xff\xfe"));
    assert_eq!(lines.next().await, Bytes::from_static(b"\x80abc"));
}

#[tokio::test]
async fn test_empty_file_yields_nothing() {
    let temp_file = NamedTempFile::new().unwrap();

    let (mut lines, handle) =
        spawn_line_source(open(&temp_file).await, CancellationToken::new());

    handle.await.unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(50), lines.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_long_line_is_not_split() {
    let mut temp_file = NamedTempFile::new().unwrap();
    let long = vec![b'x'; 64 * 1024];
    temp_file.write_all(&long).unwrap();
    temp_file.write_all(b"\n").unwrap();

    let (mut lines, _handle) =
        spawn_line_source(open(&temp_file).await, CancellationToken::new());

    assert_eq!(lines.next().await, Bytes::from(long));
}
