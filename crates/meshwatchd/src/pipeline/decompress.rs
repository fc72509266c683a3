//! Decompress stage: raw DEFLATE payloads to plain JSON bytes.

use super::Datagram;
use std::io::Read;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Upper bound for an inflated payload.
pub const MAX_INFLATED_SIZE: u64 = 1024 * 1024;

/// Inflate a raw DEFLATE stream (no zlib or gzip header).
pub fn inflate(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = flate2::read::DeflateDecoder::new(payload).take(MAX_INFLATED_SIZE);
    let mut inflated = Vec::with_capacity(payload.len() * 4);
    decoder.read_to_end(&mut inflated)?;
    Ok(inflated)
}

/// Decompress in place. On failure the datagram is marked errored and its
/// payload left untouched.
pub fn decompress(mut datagram: Datagram) -> Datagram {
    if datagram.errored || !datagram.compressed {
        return datagram;
    }
    match inflate(&datagram.payload) {
        Ok(inflated) => {
            datagram.payload = inflated;
            datagram.compressed = false;
        }
        Err(e) => {
            warn!(source = %datagram.source, "Failed to inflate payload: {}", e);
            datagram.errored = true;
        }
    }
    datagram
}

/// Stage loop; exits once the upstream queue is closed and drained.
pub async fn run(mut rx: mpsc::Receiver<Datagram>, tx: mpsc::Sender<Datagram>) {
    while let Some(datagram) = rx.recv().await {
        if tx.send(decompress(datagram)).await.is_err() {
            warn!("Decode stage is gone, stopping decompression");
            break;
        }
    }
    debug!("Decompress stage finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_inflate_round_trip() {
        let json = br#"{"statistics":{"node_id":"n1","clients":{"total":3}}}"#;
        assert_eq!(inflate(&deflate(json)).unwrap(), json.to_vec());
    }

    #[test]
    fn test_garbage_marks_errored_but_keeps_datagram() {
        let datagram = Datagram::new("[fe80::1]:1001".parse().unwrap(), vec![0xff, 0x00, 0x13], true);
        let out = decompress(datagram);
        assert!(out.errored);
        assert_eq!(out.payload, vec![0xff, 0x00, 0x13]);
    }

    #[test]
    fn test_uncompressed_passes_through() {
        let datagram = Datagram::new("[fe80::1]:1001".parse().unwrap(), b"{}".to_vec(), false);
        let out = decompress(datagram);
        assert!(!out.errored);
        assert_eq!(out.payload, b"{}".to_vec());
    }
}
