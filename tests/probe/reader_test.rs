//! Line reader tasks draining both diagnostic channels into one queue.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use streamwatch::probe::reader::{spawn_reader, Channel, ReaderMessage};

async fn drain(rx: &mut mpsc::UnboundedReceiver<ReaderMessage>) -> Vec<ReaderMessage> {
    let mut out = Vec::new();
    while let Some(msg) = rx.recv().await {
        out.push(msg);
    }
    out
}

fn texts(messages: &[ReaderMessage]) -> Vec<&str> {
    messages.iter().filter_map(ReaderMessage::text).collect()
}

#[tokio::test]
async fn lines_then_closed_marker() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let input: &[u8] = b"first\r\nsecond\nunterminated";
    spawn_reader(input, tx, Channel::Stderr)
        .await
        .expect("reader task");

    let messages = drain(&mut rx).await;
    assert_eq!(texts(&messages), vec!["first", "second", "unterminated"]);
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[3], ReaderMessage::Closed(Channel::Stderr));
}

#[tokio::test]
async fn lines_longer_than_one_chunk_are_joined() {
    let long = "x".repeat(3000);
    let input = format!("{long}\nshort\n").into_bytes();
    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_reader(std::io::Cursor::new(input), tx, Channel::Stdout)
        .await
        .expect("reader task");

    let messages = drain(&mut rx).await;
    assert_eq!(messages.len(), 3);
    assert_eq!(texts(&messages), vec![long.as_str(), "short"]);
}

#[tokio::test]
async fn both_channels_share_one_queue() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let out = spawn_reader(&b"from stdout\n"[..], tx.clone(), Channel::Stdout);
    let err = spawn_reader(&b"from stderr\n"[..], tx, Channel::Stderr);
    out.await.expect("stdout task");
    err.await.expect("stderr task");

    let messages = drain(&mut rx).await;
    let closed = messages
        .iter()
        .filter(|m| matches!(m, ReaderMessage::Closed(_)))
        .count();
    assert_eq!(closed, 2);
    let lines = texts(&messages);
    assert!(lines.contains(&"from stdout"));
    assert!(lines.contains(&"from stderr"));
}

#[tokio::test]
async fn invalid_utf8_is_replaced() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_reader(&b"ok \xff bytes\n"[..], tx, Channel::Stderr)
        .await
        .expect("reader task");
    let messages = drain(&mut rx).await;
    assert_eq!(messages[0].text(), Some("ok \u{fffd} bytes"));
}

#[tokio::test]
async fn lines_carry_their_read_time_not_their_drain_time() {
    let (mut writer, pipe) = tokio::io::duplex(64);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = spawn_reader(pipe, tx, Channel::Stderr);

    writer.write_all(b"early\n").await.expect("write");
    tokio::time::sleep(Duration::from_millis(300)).await;
    writer.write_all(b"late\n").await.expect("write");
    drop(writer);
    task.await.expect("reader task");

    let stamps: Vec<std::time::Instant> = drain(&mut rx)
        .await
        .into_iter()
        .filter_map(|m| match m {
            ReaderMessage::Line { received_at, .. } => Some(received_at),
            ReaderMessage::Closed(_) => None,
        })
        .collect();
    assert_eq!(stamps.len(), 2);
    assert!(stamps[1].saturating_duration_since(stamps[0]) >= Duration::from_millis(300));
}
