//! Serialization of operations on a shared upload stream

use std::sync::Arc;
use std::time::Duration;
use upstream_s3::protocol::memory::MemoryMultipartStore;
use upstream_s3::{UploadError, UploadEvent, UploadEventKind, UploadState, UploadStream};

const CHUNK: usize = 64 * 1024;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_never_interleave() {
    let store = Arc::new(MemoryMultipartStore::new());
    let stream = Arc::new(
        UploadStream::builder(store.clone())
            .bucket("test-bucket")
            .key("shared.bin")
            .build()
            .unwrap(),
    );

    let mut handles = Vec::new();
    for writer in 0u8..8 {
        let stream = stream.clone();
        handles.push(tokio::spawn(async move {
            let chunk = vec![writer; CHUNK];
            for _ in 0..16 {
                stream.write(&chunk).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    stream.close().await.unwrap();

    let object = store.object("test-bucket", "shared.bin").unwrap();
    assert_eq!(object.len(), 8 * 16 * CHUNK);

    // Every write landed as one contiguous run
    let mut per_writer = [0usize; 8];
    for run in object.chunks(CHUNK) {
        let first = run[0];
        assert!(run.iter().all(|b| *b == first), "write was split");
        per_writer[first as usize] += 1;
    }
    assert_eq!(per_writer, [16; 8]);
}

#[tokio::test(start_paused = true)]
async fn test_lock_timeout_while_part_in_flight() {
    let store = Arc::new(MemoryMultipartStore::new().with_part_latency(Duration::from_secs(10)));
    let stream = Arc::new(
        UploadStream::builder(store.clone())
            .bucket("test-bucket")
            .key("slow.bin")
            .lock_timeout(Duration::from_millis(100))
            .build()
            .unwrap(),
    );
    let mut initiated = stream.subscribe(&[UploadEventKind::Initiated]);

    let slow = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.write(&vec![7u8; 5 * 1024 * 1024]).await })
    };

    // The slow writer holds the lock from here until its part is stored
    assert!(matches!(initiated.recv().await, Some(UploadEvent::Initiated(_))));

    let err = stream.write(b"late").await.unwrap_err();
    assert!(matches!(err, UploadError::LockTimeout(d) if d == Duration::from_millis(100)));
    assert_eq!(stream.state(), UploadState::Uploading);

    slow.await.unwrap().unwrap();
    stream.close().await.unwrap();

    // The timed-out write never touched the buffer
    let object = store.object("test-bucket", "slow.bin").unwrap();
    assert_eq!(object.len(), 5 * 1024 * 1024);
    assert!(object.iter().all(|b| *b == 7));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_part_in_flight() {
    let store = Arc::new(MemoryMultipartStore::new().with_part_latency(Duration::from_secs(60)));
    let stream = Arc::new(
        UploadStream::builder(store.clone())
            .bucket("test-bucket")
            .key("cancelled.bin")
            .build()
            .unwrap(),
    );
    let mut initiated = stream.subscribe(&[UploadEventKind::Initiated]);

    let writer = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.write(&vec![1u8; 5 * 1024 * 1024]).await })
    };
    assert!(matches!(initiated.recv().await, Some(UploadEvent::Initiated(_))));

    stream.cancel();
    let err = writer.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());

    stream.close().await.unwrap();
    assert_eq!(stream.state(), UploadState::Aborted);
    assert_eq!(store.complete_calls(), 0);
    assert_eq!(store.pending_uploads(), 0);
}

#[tokio::test]
async fn test_concurrent_close_completes_once() {
    let store = Arc::new(MemoryMultipartStore::new());
    let stream = Arc::new(
        UploadStream::builder(store.clone())
            .bucket("test-bucket")
            .key("once.bin")
            .build()
            .unwrap(),
    );
    stream.write(b"payload").await.unwrap();

    let closers: Vec<_> = (0..4)
        .map(|_| {
            let stream = stream.clone();
            tokio::spawn(async move { stream.close().await })
        })
        .collect();
    for closer in closers {
        closer.await.unwrap().unwrap();
    }

    assert_eq!(store.complete_calls(), 1);
    assert_eq!(stream.state(), UploadState::Completed);
}

#[tokio::test]
async fn test_drop_without_close_aborts_in_background() {
    let store = Arc::new(MemoryMultipartStore::new());
    let stream = UploadStream::builder(store.clone())
        .bucket("test-bucket")
        .key("dropped.bin")
        .build()
        .unwrap();

    stream.write(b"partial").await.unwrap();
    assert_eq!(store.pending_uploads(), 1);
    drop(stream);

    for _ in 0..10 {
        if store.pending_uploads() == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(store.pending_uploads(), 0);
    assert_eq!(store.complete_calls(), 0);
    assert!(store.object("test-bucket", "dropped.bin").is_none());
}
