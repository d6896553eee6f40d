//! End-to-end transfers over loopback TCP.
//!
//! Real Sender/Receiver pairs, plus hand-rolled peers for the failure cases
//! a well-behaved sender never produces.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hdrop_core::{ErrorKind, HdropError, HdropResult};
use hdrop_crypto::{generate_key, ChunkCipher};
use hdrop_transfer::{
    ReceivedFile, Receiver, ReceiverOptions, Sender, SenderOptions, TransferHeader, TransferMode,
    WireReader,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn receiver_options(save_dir: &Path) -> ReceiverOptions {
    ReceiverOptions {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        save_dir: save_dir.to_path_buf(),
        chunk_size: 4096,
        accept_timeout: Some(Duration::from_secs(10)),
        read_timeout: Some(Duration::from_secs(10)),
        keep_partial: false,
    }
}

fn write_source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Bind a receiver and run one accept + receive in the background.
/// Yields the result and every progress value reported.
fn spawn_receiver(
    options: ReceiverOptions,
    mode: TransferMode,
) -> (
    SocketAddr,
    tokio::task::JoinHandle<(HdropResult<ReceivedFile>, Vec<u8>)>,
) {
    let receiver = Receiver::bind(options).unwrap();
    let addr = receiver.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        let result = match receiver.accept_connection().await {
            Ok(pending) => {
                let mut sink = |p: u8| seen.push(p);
                pending.receive_file(&mode, Some(&mut sink)).await
            }
            Err(e) => Err(e),
        };
        (result, seen)
    });
    (addr, handle)
}

fn assert_progress(seen: &[u8]) {
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(*seen.last().unwrap(), 100);
}

#[tokio::test]
async fn plain_transfer_reconstructs_file() {
    let src = tempfile::TempDir::new().unwrap();
    let inbox = tempfile::TempDir::new().unwrap();
    let data = sample(10_000);
    let path = write_source(src.path(), "test.bin", &data);

    let (addr, receiving) = spawn_receiver(receiver_options(inbox.path()), TransferMode::Plain);

    let mut sent_progress = Vec::new();
    let mut sink = |p: u8| sent_progress.push(p);
    let sender = Sender::connect(addr, SenderOptions::default()).await.unwrap();
    let report = sender
        .send_file(&path, &TransferMode::Plain, Some(&mut sink))
        .await
        .unwrap();

    let (received, recv_progress) = receiving.await.unwrap();
    let received = received.unwrap();

    assert_eq!(report.bytes_sent, 10_000);
    assert_eq!(report.chunks, 3);
    assert!(!report.encrypted);
    assert_eq!(received.path, inbox.path().join("test.bin"));
    assert_eq!(received.bytes, 10_000);
    assert_eq!(received.sha256, report.sha256);
    assert_eq!(std::fs::read(&received.path).unwrap(), data);
    assert_progress(&sent_progress);
    assert_progress(&recv_progress);
}

#[tokio::test]
async fn plain_wire_is_header_then_raw_bytes() {
    let src = tempfile::TempDir::new().unwrap();
    let data = sample(10_000);
    let path = write_source(src.path(), "test.bin", &data);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let capture = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        buf
    });

    let sender = Sender::connect(addr, SenderOptions::default()).await.unwrap();
    sender
        .send_file(&path, &TransferMode::Plain, None)
        .await
        .unwrap();
    let wire = capture.await.unwrap();

    let mut header = vec![0, 0, 0, 8];
    header.extend_from_slice(b"test.bin");
    header.extend_from_slice(&10_000u64.to_be_bytes());
    header.extend_from_slice(&0u32.to_be_bytes());

    assert_eq!(&wire[..header.len()], &header[..]);
    assert_eq!(&wire[header.len()..], &data[..]);
}

#[tokio::test]
async fn encrypted_transfer_uses_one_frame_per_chunk() {
    let src = tempfile::TempDir::new().unwrap();
    let data = sample(10_000);
    let path = write_source(src.path(), "test.bin", &data);
    let key = generate_key();
    let mode = TransferMode::from_key(Some(&key.as_bytes()[..])).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let capture = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        buf
    });

    let sender = Sender::connect(addr, SenderOptions::default()).await.unwrap();
    let report = sender.send_file(&path, &mode, None).await.unwrap();
    assert!(report.encrypted);
    assert_eq!(report.chunks, 3);

    let wire = capture.await.unwrap();
    let mut reader = WireReader::new(&wire[..], None, CancellationToken::new());
    let header = TransferHeader::read_from(&mut reader).await.unwrap();
    assert!(header.encrypted);
    assert_eq!(header.file_size, 10_000);

    let cipher = ChunkCipher::from_key(&key);
    let mut plain = Vec::new();
    let mut sizes = Vec::new();
    for _ in 0..3 {
        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.iv.len(), 12);
        assert_eq!(frame.tag.len(), 16);
        sizes.push(frame.ciphertext.len());
        plain.extend(cipher.decrypt_frame(&frame).unwrap());
    }
    assert_eq!(sizes, vec![4096, 4096, 1808]);
    assert_eq!(plain, data);
}

#[tokio::test]
async fn encrypted_transfer_reconstructs_file() {
    let src = tempfile::TempDir::new().unwrap();
    let inbox = tempfile::TempDir::new().unwrap();
    let data = sample(10_000);
    let path = write_source(src.path(), "test.bin", &data);
    let key = generate_key();

    let (addr, receiving) = spawn_receiver(
        receiver_options(inbox.path()),
        TransferMode::from_key(Some(&key.as_bytes()[..])).unwrap(),
    );

    let mode = TransferMode::from_key(Some(&key.as_bytes()[..])).unwrap();
    let sender = Sender::connect(addr, SenderOptions::default()).await.unwrap();
    let report = sender.send_file(&path, &mode, None).await.unwrap();

    let (received, progress) = receiving.await.unwrap();
    let received = received.unwrap();

    assert!(received.encrypted);
    assert_eq!(received.chunks, 3);
    assert_eq!(received.sha256, report.sha256);
    assert_eq!(std::fs::read(&received.path).unwrap(), data);
    assert_progress(&progress);
}

/// Header plus sealed chunks, with the second chunk's tag flipped.
async fn send_tampered(addr: SocketAddr, cipher: &ChunkCipher, data: &[u8]) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let header = TransferHeader {
        file_name: "test.bin".into(),
        file_size: data.len() as u64,
        encrypted: true,
    };
    stream.write_all(&header.encode().unwrap()).await.unwrap();
    for (i, chunk) in data.chunks(4096).enumerate() {
        let mut frame = cipher.encrypt_chunk(chunk).unwrap();
        if i == 1 {
            frame.tag[0] ^= 0x01;
        }
        // The receiver may hang up after the bad frame.
        if stream.write_all(&frame.to_bytes().unwrap()).await.is_err() {
            break;
        }
    }
}

#[tokio::test]
async fn tampered_chunk_keeps_only_verified_bytes_as_partial() {
    let inbox = tempfile::TempDir::new().unwrap();
    let data = sample(10_000);
    let key = generate_key();
    let cipher = ChunkCipher::from_key(&key);

    let mut options = receiver_options(inbox.path());
    options.keep_partial = true;
    let (addr, receiving) = spawn_receiver(options, TransferMode::Encrypted(cipher.clone()));
    send_tampered(addr, &cipher, &data).await;

    let (result, _) = receiving.await.unwrap();
    let err = result.unwrap_err();
    assert!(matches!(err, HdropError::AuthenticationFailure));
    assert_eq!(err.kind(), ErrorKind::Authentication);

    assert!(!inbox.path().join("test.bin").exists());
    let partial = std::fs::read(inbox.path().join("test.bin.partial")).unwrap();
    assert_eq!(partial, &data[..4096]);
}

#[tokio::test]
async fn tampered_chunk_leaves_nothing_by_default() {
    let inbox = tempfile::TempDir::new().unwrap();
    let data = sample(10_000);
    let cipher = ChunkCipher::from_key(&generate_key());

    let (addr, receiving) = spawn_receiver(
        receiver_options(inbox.path()),
        TransferMode::Encrypted(cipher.clone()),
    );
    send_tampered(addr, &cipher, &data).await;

    let (result, _) = receiving.await.unwrap();
    assert!(matches!(result, Err(HdropError::AuthenticationFailure)));
    assert_eq!(std::fs::read_dir(inbox.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn wrong_key_fails_authentication() {
    let src = tempfile::TempDir::new().unwrap();
    let inbox = tempfile::TempDir::new().unwrap();
    let path = write_source(src.path(), "secret.txt", b"attack at dawn");

    let (addr, receiving) = spawn_receiver(
        receiver_options(inbox.path()),
        TransferMode::Encrypted(ChunkCipher::from_key(&generate_key())),
    );
    let mode = TransferMode::Encrypted(ChunkCipher::from_key(&generate_key()));
    let sender = Sender::connect(addr, SenderOptions::default()).await.unwrap();
    sender.send_file(&path, &mode, None).await.unwrap();

    let (result, _) = receiving.await.unwrap();
    assert!(matches!(result, Err(HdropError::AuthenticationFailure)));
    assert!(!inbox.path().join("secret.txt").exists());
}

#[tokio::test]
async fn empty_file_sends_header_only() {
    let src = tempfile::TempDir::new().unwrap();
    let inbox = tempfile::TempDir::new().unwrap();
    let path = write_source(src.path(), "empty.txt", b"");

    let (addr, receiving) = spawn_receiver(receiver_options(inbox.path()), TransferMode::Plain);
    let mut progress = Vec::new();
    let mut sink = |p: u8| progress.push(p);
    let sender = Sender::connect(addr, SenderOptions::default()).await.unwrap();
    let report = sender
        .send_file(&path, &TransferMode::Plain, Some(&mut sink))
        .await
        .unwrap();

    let (received, recv_progress) = receiving.await.unwrap();
    let received = received.unwrap();

    assert_eq!(report.chunks, 0);
    assert_eq!(progress, vec![100]);
    assert_eq!(recv_progress, vec![100]);
    assert_eq!(std::fs::metadata(&received.path).unwrap().len(), 0);
}

#[tokio::test]
async fn missing_source_file_fails_and_closes_connection() {
    let src = tempfile::TempDir::new().unwrap();
    let inbox = tempfile::TempDir::new().unwrap();

    let (addr, receiving) = spawn_receiver(receiver_options(inbox.path()), TransferMode::Plain);
    let sender = Sender::connect(addr, SenderOptions::default()).await.unwrap();
    let err = sender
        .send_file(&src.path().join("nope.bin"), &TransferMode::Plain, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);

    // The sender dropped its stream, so the receiver sees an early close.
    let (result, _) = receiving.await.unwrap();
    assert!(matches!(
        result,
        Err(HdropError::ConnectionClosed {
            expected: 4,
            received: 0
        })
    ));
}

#[tokio::test]
async fn connection_refused_is_network_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let result = Sender::connect(SocketAddr::from(([127, 0, 0, 1], port)), SenderOptions::default()).await;
    let err = result.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Network);
}

#[tokio::test]
async fn chunk_size_above_frame_limit_rejected_before_connecting() {
    let options = SenderOptions {
        chunk_size: hdrop_core::MAX_CHUNK_SIZE + 1,
        ..SenderOptions::default()
    };
    let result = Sender::connect(SocketAddr::from(([127, 0, 0, 1], 9)), options).await;
    assert!(matches!(result, Err(HdropError::Config(_))));
}

#[tokio::test]
async fn early_close_mid_body_is_connection_closed() {
    let inbox = tempfile::TempDir::new().unwrap();
    let (addr, receiving) = spawn_receiver(receiver_options(inbox.path()), TransferMode::Plain);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let header = TransferHeader {
        file_name: "test.bin".into(),
        file_size: 10_000,
        encrypted: false,
    };
    stream.write_all(&header.encode().unwrap()).await.unwrap();
    stream.write_all(&sample(100)).await.unwrap();
    drop(stream);

    let (result, _) = receiving.await.unwrap();
    let err = result.unwrap_err();
    assert!(matches!(
        err,
        HdropError::ConnectionClosed {
            expected: 10_000,
            received: 100
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(std::fs::read_dir(inbox.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn traversal_file_name_rejected() {
    let root = tempfile::TempDir::new().unwrap();
    let inbox = root.path().join("inbox");
    let (addr, receiving) = spawn_receiver(receiver_options(&inbox), TransferMode::Plain);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let header = TransferHeader {
        file_name: "../evil.txt".into(),
        file_size: 4,
        encrypted: false,
    };
    stream.write_all(&header.encode().unwrap()).await.unwrap();
    let _ = stream.write_all(b"pwnd").await;

    let (result, _) = receiving.await.unwrap();
    assert!(matches!(result, Err(HdropError::Protocol(_))));
    assert!(!root.path().join("evil.txt").exists());
}

#[tokio::test]
async fn encrypted_header_without_key_is_configuration_error() {
    let inbox = tempfile::TempDir::new().unwrap();
    let (addr, receiving) = spawn_receiver(receiver_options(inbox.path()), TransferMode::Plain);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let header = TransferHeader {
        file_name: "test.bin".into(),
        file_size: 10,
        encrypted: true,
    };
    stream.write_all(&header.encode().unwrap()).await.unwrap();

    let (result, _) = receiving.await.unwrap();
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn cancelled_receiver_stops_waiting() {
    let inbox = tempfile::TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let mut options = receiver_options(inbox.path());
    options.accept_timeout = None;
    let receiver = Receiver::bind(options)
        .unwrap()
        .with_cancellation(cancel.clone());

    let waiting = tokio::spawn(async move { receiver.accept_connection().await.map(|_| ()) });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    assert!(matches!(waiting.await.unwrap(), Err(HdropError::Cancelled)));
}
