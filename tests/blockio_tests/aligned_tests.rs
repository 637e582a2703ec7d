//! Tests for block-aligned partial I/O
//!
//! These tests verify:
//! - Insider, body-only and head/body/tail requests
//! - Bytes outside a write are preserved
//! - Transient write failures are retried, others are not
//! - The file-backed device checks alignment and zero-fills

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use kvsns::blockio::{AlignedIo, BlockTransport, FileBlockDevice};
use kvsns::config::IoRetryPolicy;
use kvsns::{KvsnsError, Result};
use parking_lot::Mutex;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const BS: u64 = 16;

/// In-memory transport recording every block write
struct MemTransport {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    writes: Mutex<Vec<(u64, usize)>>,
    /// Transient failures still to inject
    failures: AtomicU32,
    /// Inject a permanent failure instead
    broken: bool,
}

impl MemTransport {
    fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            failures: AtomicU32::new(0),
            broken: false,
        }
    }

    fn flaky(failures: u32) -> Self {
        let t = Self::new();
        t.failures.store(failures, Ordering::SeqCst);
        t
    }

    fn with_object(self, obj: &str, content: Vec<u8>) -> Self {
        self.objects.lock().insert(obj.to_string(), content);
        self
    }

    fn content(&self, obj: &str) -> Vec<u8> {
        self.objects.lock().get(obj).cloned().unwrap_or_default()
    }

    fn write_log(&self) -> Vec<(u64, usize)> {
        self.writes.lock().clone()
    }
}

impl BlockTransport for MemTransport {
    fn block_size(&self) -> u64 {
        BS
    }

    fn read_blocks(&self, obj: &str, offset: u64, buf: &mut [u8]) -> Result<()> {
        assert_eq!(offset % BS, 0);
        assert_eq!(buf.len() as u64 % BS, 0);
        let objects = self.objects.lock();
        let data = objects.get(obj).map(|v| v.as_slice()).unwrap_or(&[]);
        for (i, b) in buf.iter_mut().enumerate() {
            *b = data.get(offset as usize + i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write_blocks(&self, obj: &str, offset: u64, data: &[u8]) -> Result<()> {
        assert_eq!(offset % BS, 0);
        assert_eq!(data.len() as u64 % BS, 0);
        if self.broken {
            return Err(KvsnsError::backend("device gone"));
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(KvsnsError::transient("device busy"));
        }

        self.writes.lock().push((offset, data.len()));
        let mut objects = self.objects.lock();
        let content = objects.entry(obj.to_string()).or_default();
        let end = offset as usize + data.len();
        if content.len() < end {
            content.resize(end, 0);
        }
        content[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn create(&self, obj: &str) -> Result<()> {
        self.objects.lock().insert(obj.to_string(), Vec::new());
        Ok(())
    }

    fn exists(&self, obj: &str) -> Result<bool> {
        Ok(self.objects.lock().contains_key(obj))
    }

    fn remove(&self, obj: &str) -> Result<()> {
        self.objects.lock().remove(obj);
        Ok(())
    }

    fn shrink(&self, obj: &str, len: u64) -> Result<()> {
        if let Some(content) = self.objects.lock().get_mut(obj) {
            content.truncate(len as usize);
        }
        Ok(())
    }
}

fn fast_retry(max_attempts: u32) -> IoRetryPolicy {
    IoRetryPolicy {
        max_attempts,
        backoff: Duration::from_millis(1),
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 26) as u8).collect()
}

// =============================================================================
// Write Tests
// =============================================================================

#[test]
fn test_insider_write_preserves_neighbours() {
    let transport = MemTransport::new().with_object("o", vec![b'.'; 32]);
    let io = AlignedIo::new(&transport, fast_retry(3));

    assert_eq!(io.pwrite("o", 3, b"abcd").unwrap(), 4);

    let content = transport.content("o");
    assert_eq!(&content[..3], b"...");
    assert_eq!(&content[3..7], b"abcd");
    assert_eq!(&content[7..], &[b'.'; 25][..]);
    // a single read-modify-write of block 0
    assert_eq!(transport.write_log(), vec![(0, 16)]);
}

#[test]
fn test_aligned_write_is_one_bulk_transfer() {
    let transport = MemTransport::new();
    let io = AlignedIo::new(&transport, fast_retry(3));

    let data = pattern(48);
    assert_eq!(io.pwrite("o", 16, &data).unwrap(), 48);
    assert_eq!(transport.write_log(), vec![(16, 48)]);
    assert_eq!(&transport.content("o")[16..64], &data[..]);
}

#[test]
fn test_unaligned_write_head_body_tail() {
    let transport = MemTransport::new().with_object("o", vec![b'.'; 64]);
    let io = AlignedIo::new(&transport, fast_retry(3));

    // [10, 50): head [10,16), body [16,48), tail [48,50)
    let data = pattern(40);
    assert_eq!(io.pwrite("o", 10, &data).unwrap(), 40);

    let content = transport.content("o");
    assert_eq!(&content[..10], &[b'.'; 10][..]);
    assert_eq!(&content[10..50], &data[..]);
    assert_eq!(&content[50..], &[b'.'; 14][..]);

    let log = transport.write_log();
    assert_eq!(log.len(), 3);
    assert!(log.contains(&(16, 32)));
    assert!(log.contains(&(0, 16)));
    assert!(log.contains(&(48, 16)));
}

#[test]
fn test_two_partial_blocks_without_body() {
    let transport = MemTransport::new().with_object("o", vec![b'.'; 32]);
    let io = AlignedIo::new(&transport, fast_retry(3));

    assert_eq!(io.pwrite("o", 12, b"ABCDEFGH").unwrap(), 8);
    let content = transport.content("o");
    assert_eq!(&content[8..24], b"....ABCDEFGH....");
    assert_eq!(transport.write_log().len(), 2);
}

#[test]
fn test_empty_write() {
    let transport = MemTransport::new();
    let io = AlignedIo::new(&transport, fast_retry(3));
    assert_eq!(io.pwrite("o", 5, b"").unwrap(), 0);
    assert!(transport.write_log().is_empty());
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_unaligned_read() {
    let data = pattern(80);
    let transport = MemTransport::new().with_object("o", data.clone());
    let io = AlignedIo::new(&transport, fast_retry(3));

    let mut buf = vec![0u8; 37];
    assert_eq!(io.pread("o", 5, &mut buf).unwrap(), 37);
    assert_eq!(&buf[..], &data[5..42]);

    let mut small = vec![0u8; 3];
    io.pread("o", 17, &mut small).unwrap();
    assert_eq!(&small[..], &data[17..20]);
}

#[test]
fn test_read_past_end_is_zero() {
    let transport = MemTransport::new().with_object("o", vec![7u8; 10]);
    let io = AlignedIo::new(&transport, fast_retry(3));

    let mut buf = vec![0xFFu8; 20];
    io.pread("o", 4, &mut buf).unwrap();
    assert_eq!(&buf[..6], &[7u8; 6][..]);
    assert!(buf[6..].iter().all(|&b| b == 0));
}

// =============================================================================
// Retry Tests
// =============================================================================

#[test]
fn test_transient_failures_are_retried() {
    let transport = MemTransport::flaky(2);
    let io = AlignedIo::new(&transport, fast_retry(3));

    assert_eq!(io.pwrite("o", 0, &pattern(16)).unwrap(), 16);
    assert_eq!(transport.content("o"), pattern(16));
}

#[test]
fn test_retry_exhaustion() {
    let transport = MemTransport::flaky(5);
    let io = AlignedIo::new(&transport, fast_retry(3));

    let err = io.pwrite("o", 0, &pattern(16)).unwrap_err();
    assert!(matches!(err, KvsnsError::Backend { retryable: false, .. }));
    assert!(transport.write_log().is_empty());
}

#[test]
fn test_permanent_failure_not_retried() {
    let mut transport = MemTransport::flaky(0);
    transport.broken = true;
    let io = AlignedIo::new(&transport, IoRetryPolicy {
        max_attempts: 10,
        backoff: Duration::from_secs(60),
    });

    // would block for minutes if it retried
    assert!(io.pwrite("o", 0, &pattern(16)).is_err());
}

// =============================================================================
// File Device Tests
// =============================================================================

#[test]
fn test_file_device_round_trip() {
    let dir = TempDir::new().unwrap();
    let device = FileBlockDevice::open(dir.path(), 512).unwrap();
    device.create("obj").unwrap();
    assert!(device.exists("obj").unwrap());
    assert!(matches!(device.create("obj"), Err(KvsnsError::AlreadyExists(_))));

    let io = AlignedIo::new(&device, fast_retry(3));
    let data = pattern(1000);
    io.pwrite("obj", 300, &data).unwrap();

    let mut buf = vec![0u8; 1300];
    io.pread("obj", 0, &mut buf).unwrap();
    assert!(buf[..300].iter().all(|&b| b == 0));
    assert_eq!(&buf[300..], &data[..]);
}

#[test]
fn test_file_device_rejects_unaligned() {
    let dir = TempDir::new().unwrap();
    let device = FileBlockDevice::open(dir.path(), 512).unwrap();
    device.create("obj").unwrap();

    assert!(matches!(
        device.write_blocks("obj", 100, &[0u8; 512]),
        Err(KvsnsError::InvalidArgument(_))
    ));
    let mut buf = vec![0u8; 100];
    assert!(device.read_blocks("obj", 0, &mut buf).is_err());
    assert!(matches!(device.remove("missing"), Err(KvsnsError::NotFound(_))));
}
