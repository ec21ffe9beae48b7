//! Content hashing for checksum comparison

use crate::backend::{map_io_error, Backend, BackendResult};
use crate::types::FileDescriptor;
use std::io::{self, ErrorKind, Read};

/// Compute the Blake3 hash of a stream.
///
/// The stream is read in 64KB chunks until end-of-stream.
///
/// # Example
/// ```
/// use treesync::hash::hash_stream;
///
/// let a = hash_stream(&b"same"[..])?;
/// let b = hash_stream(&b"same"[..])?;
/// assert_eq!(a, b);
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn hash_stream<R: Read>(mut reader: R) -> io::Result<[u8; 32]> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(*hasher.finalize().as_bytes())
}

/// Hash a file through whichever backend holds it
pub fn hash_file(backend: &dyn Backend, file: &FileDescriptor) -> BackendResult<[u8; 32]> {
    let reader = backend.open_read(file)?;
    hash_stream(reader).map_err(|e| map_io_error(file.full_path(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VirtualBackend;

    #[test]
    fn test_hash_empty_stream() {
        let hash = hash_stream(&b""[..]).expect("hash empty");
        assert_eq!(hash, *blake3::hash(b"").as_bytes());
    }

    #[test]
    fn test_hash_deterministic() {
        let content = b"Test content for hashing";
        let hash1 = hash_stream(&content[..]).expect("hash 1");
        let hash2 = hash_stream(&content[..]).expect("hash 2");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hash_different_content() {
        let hash1 = hash_stream(&b"Content A"[..]).expect("hash A");
        let hash2 = hash_stream(&b"Content B"[..]).expect("hash B");
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_hash_spans_chunks() {
        let content = vec![42u8; 200 * 1024];
        let hash = hash_stream(&content[..]).expect("hash large");
        assert_eq!(hash, *blake3::hash(&content).as_bytes());
    }

    #[test]
    fn test_hash_file_through_backend() {
        let fs = VirtualBackend::new();
        let file = fs.add_file("/a.txt", b"hello".to_vec());
        let hash = hash_file(&fs, &file).expect("hash file");
        assert_eq!(hash, *blake3::hash(b"hello").as_bytes());
    }

    #[test]
    fn test_hash_vanished_file() {
        let fs = VirtualBackend::new();
        let file = fs.add_file("/a.txt", b"hello".to_vec());
        let gone = fs.resolve_file("/a.txt");
        assert!(fs.try_delete_file(&gone).expect("delete"));

        let err = hash_file(&fs, &file).expect_err("file vanished");
        assert!(err.is_recoverable());
    }
}
