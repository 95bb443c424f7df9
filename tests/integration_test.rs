use std::fs;
use std::net::TcpStream;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use tempfile::tempdir;

use ftcp::checksum::crc32;
use ftcp::error::FtError;
use ftcp::protocol::{
    ChecksumType, ChunkAck, ChunkHeader, ErrorMessage, FileAck, FileInfo, HandshakePayload,
    MsgType, DEFAULT_CHUNK_SIZE, ERROR_MSG_SIZE, FILE_CHECKSUM_SIZE, HANDSHAKE_SIZE,
};
use ftcp::receiver::FileReceiver;
use ftcp::sender::FileSender;
use ftcp::transport::FrameStream;

/// Bind a receiver on an OS-assigned port and serve one transfer on a
/// background thread.
fn spawn_receiver(output_dir: PathBuf) -> (u16, JoinHandle<ftcp::Result<PathBuf>>) {
    let mut receiver = FileReceiver::bind(&output_dir, 0).expect("bind receiver");
    let port = receiver.local_port();
    let handle = thread::spawn(move || receiver.serve_one());
    (port, handle)
}

fn transfer_file(contents: &[u8], name: &str) -> (Vec<u8>, PathBuf) {
    let src_dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let src_path = src_dir.path().join(name);
    fs::write(&src_path, contents).unwrap();

    let (port, receiver) = spawn_receiver(out_dir.path().to_path_buf());

    let mut sender = FileSender::new(&src_path).unwrap();
    let stats = sender.send_to("127.0.0.1", port).expect("send failed");
    assert_eq!(stats.bytes_sent, contents.len() as u64);

    let final_path = receiver.join().unwrap().expect("receive failed");
    let received = fs::read(&final_path).unwrap();

    // The hidden temp file must be gone.
    assert!(!out_dir.path().join(format!(".{}.tmp", name)).exists());

    // Keep the tempdirs alive until we've read the result.
    drop(src_dir);
    (received, final_path)
}

#[test]
fn test_empty_file() {
    let (received, path) = transfer_file(b"", "send.txt");
    assert!(received.is_empty());
    assert!(path.ends_with("send.txt"));
}

#[test]
fn test_exact_chunk_file() {
    let contents = vec![0xABu8; DEFAULT_CHUNK_SIZE as usize];
    assert_eq!(crc32(&contents), 0xE7A41B02);

    let (received, _) = transfer_file(&contents, "exact.bin");
    assert_eq!(received, contents);
}

#[test]
fn test_odd_size_file() {
    // One full chunk plus a single trailing byte.
    let contents = vec![0u8; DEFAULT_CHUNK_SIZE as usize + 1];
    let (received, _) = transfer_file(&contents, "odd.bin");
    assert_eq!(received, contents);
}

#[test]
fn test_many_small_chunks() {
    let contents: Vec<u8> = (0..10_240u32).map(|i| (i % 251) as u8).collect();

    let src_dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let src_path = src_dir.path().join("many.bin");
    fs::write(&src_path, &contents).unwrap();

    let (port, receiver) = spawn_receiver(out_dir.path().to_path_buf());

    let mut sender = FileSender::new(&src_path).unwrap();
    sender.set_chunk_size(1024);
    let stats = sender.send_to("127.0.0.1", port).unwrap();
    assert_eq!(stats.chunks_sent, 10);

    let final_path = receiver.join().unwrap().unwrap();
    assert_eq!(fs::read(final_path).unwrap(), contents);
}

/// Speak the protocol by hand: handshake then FILE_INFO, returning the
/// framed stream for the chunk phase.
fn raw_client_session(port: u16, info: &FileInfo) -> FrameStream {
    let mut fs = raw_handshake(port);

    fs.send_message(MsgType::FileInfo, 2, &info.encode().unwrap())
        .unwrap();
    fs
}

fn raw_handshake(port: u16) -> FrameStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut fs = FrameStream::new(stream).unwrap();

    fs.send_message(MsgType::HandshakeReq, 0, &HandshakePayload::new().encode())
        .unwrap();
    let (header, payload) = fs.recv_message(ERROR_MSG_SIZE as u64).unwrap();
    assert_eq!(header.msg_type, MsgType::HandshakeAck as u8);
    assert_eq!(header.sequence_num, 1);
    let ack = HandshakePayload::decode(&payload).unwrap();
    assert_eq!(ack.version, 1);
    fs
}

fn small_file_info(name: &str, contents: &[u8]) -> FileInfo {
    FileInfo {
        filename: name.to_string(),
        file_size: contents.len() as u64,
        total_chunks: 1,
        chunk_size: contents.len() as u32,
        checksum_type: ChecksumType::Sha256 as u8,
        file_checksum: [0u8; FILE_CHECKSUM_SIZE],
        file_mode: 0o100644,
        timestamp: 1_700_000_000,
    }
}

fn chunk_payload(chunk_id: u64, offset: u64, data: &[u8], crc: u32) -> Vec<u8> {
    let header = ChunkHeader {
        chunk_id,
        chunk_offset: offset,
        chunk_size: data.len() as u32,
        chunk_crc32: crc,
    };
    let mut payload = Vec::with_capacity(24 + data.len());
    payload.extend_from_slice(&header.encode());
    payload.extend_from_slice(data);
    payload
}

#[test]
fn test_corrupt_chunk_is_retransmitted() {
    let out_dir = tempdir().unwrap();
    let (port, receiver) = spawn_receiver(out_dir.path().to_path_buf());

    let data = b"ABCDEFGH";
    let info = small_file_info("fault.bin", data);
    let mut fs = raw_client_session(port, &info);

    let (header, payload) = fs.recv_message(ERROR_MSG_SIZE as u64).unwrap();
    assert_eq!(header.msg_type, MsgType::FileAck as u8);
    assert_eq!(FileAck::decode(&payload).unwrap().status, 0);

    // First attempt: single bit flipped in the payload, CRC computed over
    // the clean data.
    let crc = crc32(data);
    let mut corrupted = data.to_vec();
    corrupted[3] ^= 0x01;
    fs.send_message(MsgType::ChunkData, 3, &chunk_payload(0, 0, &corrupted, crc))
        .unwrap();

    let (header, payload) = fs.recv_message(ERROR_MSG_SIZE as u64).unwrap();
    assert_eq!(header.msg_type, MsgType::ChunkAck as u8);
    let ack = ChunkAck::decode(&payload).unwrap();
    assert_eq!(ack.chunk_id, 0);
    assert_eq!(ack.status, 1);

    // Retransmit with a fresh sequence number and clean bytes.
    fs.send_message(MsgType::ChunkData, 4, &chunk_payload(0, 0, data, crc))
        .unwrap();

    let (header, payload) = fs.recv_message(ERROR_MSG_SIZE as u64).unwrap();
    assert_eq!(header.msg_type, MsgType::ChunkAck as u8);
    let ack = ChunkAck::decode(&payload).unwrap();
    assert_eq!(ack.chunk_id, 0);
    assert_eq!(ack.status, 0);

    let final_path = receiver.join().unwrap().unwrap();
    assert_eq!(fs::read(final_path).unwrap(), data);
}

#[test]
fn test_path_traversal_filename_rejected() {
    let out_dir = tempdir().unwrap();
    let (port, receiver) = spawn_receiver(out_dir.path().to_path_buf());

    let mut info = small_file_info("x", b"0123456789");
    info.filename = "../etc/passwd".to_string();
    let mut fs = raw_client_session(port, &info);

    let (header, payload) = fs.recv_message(ERROR_MSG_SIZE as u64).unwrap();
    assert_eq!(header.msg_type, MsgType::Error as u8);
    let err = ErrorMessage::decode(&payload).unwrap();
    assert_eq!(
        err.error_code,
        FtError::InvalidArg(String::new()).wire_code()
    );

    let result = receiver.join().unwrap();
    assert!(matches!(result, Err(FtError::InvalidArg(_))));

    // Nothing may have been created in the output directory.
    assert_eq!(fs::read_dir(out_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_handshake_version_mismatch() {
    let out_dir = tempdir().unwrap();
    let (port, receiver) = spawn_receiver(out_dir.path().to_path_buf());

    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut fs = FrameStream::new(stream).unwrap();

    let hello = HandshakePayload {
        version: 2,
        capabilities: 0,
    };
    fs.send_message(MsgType::HandshakeReq, 0, &hello.encode())
        .unwrap();

    let (header, payload) = fs.recv_message(ERROR_MSG_SIZE as u64).unwrap();
    assert_eq!(header.msg_type, MsgType::Error as u8);
    let err = ErrorMessage::decode(&payload).unwrap();
    assert!(matches!(
        err.to_error(),
        FtError::Version { expected: 1, .. }
    ));

    let result = receiver.join().unwrap();
    assert!(matches!(result, Err(FtError::Version { got: 2, .. })));
    assert_eq!(fs::read_dir(out_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_sender_surfaces_version_mismatch() {
    // A fake receiver that answers the handshake with an unsupported
    // version; the sender must fail with a Version error.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut fs = FrameStream::new(stream).unwrap();
        let (header, _) = fs.recv_message(HANDSHAKE_SIZE as u64).unwrap();
        assert_eq!(header.msg_type, MsgType::HandshakeReq as u8);

        let ack = HandshakePayload {
            version: 2,
            capabilities: 0,
        };
        fs.send_message(MsgType::HandshakeAck, 1, &ack.encode())
            .unwrap();
    });

    let src_dir = tempdir().unwrap();
    let path = src_dir.path().join("v.bin");
    fs::write(&path, b"data").unwrap();

    let mut sender = FileSender::new(&path).unwrap();
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let err = sender.send_over(stream).unwrap_err();
    assert!(matches!(err, FtError::Version { expected: 1, got: 2 }));

    server.join().unwrap();
}

#[test]
fn test_overwrites_existing_file() {
    let src_dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let src_path = src_dir.path().join("same.bin");
    fs::write(&src_path, b"fresh contents").unwrap();
    fs::write(out_dir.path().join("same.bin"), b"stale").unwrap();

    let (port, receiver) = spawn_receiver(out_dir.path().to_path_buf());

    let mut sender = FileSender::new(&src_path).unwrap();
    sender.send_to("127.0.0.1", port).unwrap();

    let final_path = receiver.join().unwrap().unwrap();
    assert_eq!(fs::read(final_path).unwrap(), b"fresh contents");
}
