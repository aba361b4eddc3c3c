//! Part sizing when the store encrypts the object at rest

use std::sync::Arc;
use upstream_s3::protocol::memory::{MemoryMultipartStore, RecordedCall};
use upstream_s3::protocol::{InitiateRequest, ServerSideEncryption, MIN_PART_SIZE};
use upstream_s3::{StreamConfig, UploadState, UploadStream};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

fn last_part_flags(store: &MemoryMultipartStore) -> Vec<(usize, bool)> {
    store
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            RecordedCall::UploadPart {
                size, is_last_part, ..
            } => Some((size, is_last_part)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_bucket_default_encryption_never_sends_empty_final_part() {
    let store = Arc::new(MemoryMultipartStore::new().with_encryption(ServerSideEncryption::Aes256));
    let stream = UploadStream::builder(store.clone())
        .bucket("secure-bucket")
        .key("exact.bin")
        .build()
        .unwrap();
    let data = pattern(2 * MIN_PART_SIZE);

    stream.write(&data).await.unwrap();
    // The second part waits for one more byte or for close
    assert_eq!(store.part_sizes(), vec![MIN_PART_SIZE]);

    stream.close().await.unwrap();

    assert_eq!(
        last_part_flags(&store),
        vec![(MIN_PART_SIZE, false), (MIN_PART_SIZE, true)]
    );
    assert_eq!(store.object("secure-bucket", "exact.bin").unwrap(), data);
}

#[tokio::test]
async fn test_requested_kms_encryption_withholds_residual_byte() {
    let store = Arc::new(MemoryMultipartStore::new());
    let mut request = InitiateRequest::new("secure-bucket", "kms.bin");
    request.server_side_encryption = ServerSideEncryption::AwsKms {
        key_id: Some("alias/uploads".to_string()),
    };
    let stream = UploadStream::builder(store.clone())
        .request(request)
        .build()
        .unwrap();
    let data = pattern(12 * 1024 * 1024);

    for chunk in data.chunks(1024 * 1024) {
        stream.write(chunk).await.unwrap();
    }
    stream.close().await.unwrap();

    assert_eq!(
        store.part_sizes(),
        vec![MIN_PART_SIZE, MIN_PART_SIZE, 12 * 1024 * 1024 - 2 * MIN_PART_SIZE]
    );
    assert_eq!(stream.state(), UploadState::Completed);
    assert_eq!(store.object("secure-bucket", "kms.bin").unwrap(), data);
}

#[tokio::test]
async fn test_encrypted_exact_threshold_is_single_part() {
    let store = Arc::new(MemoryMultipartStore::new().with_encryption(ServerSideEncryption::Aes256));
    let stream = UploadStream::builder(store.clone())
        .bucket("secure-bucket")
        .key("one.bin")
        .build()
        .unwrap();

    stream.write(&pattern(MIN_PART_SIZE)).await.unwrap();
    assert!(store.part_sizes().is_empty());

    stream.close().await.unwrap();
    assert_eq!(last_part_flags(&store), vec![(MIN_PART_SIZE, true)]);
}

#[tokio::test]
async fn test_larger_part_size_with_encryption() {
    let part = 8 * 1024 * 1024;
    let store = Arc::new(MemoryMultipartStore::new().with_encryption(ServerSideEncryption::Aes256));
    let config = StreamConfig::builder()
        .min_part_size(part)
        .buffer_capacity(2 * part)
        .build()
        .unwrap();
    let stream = UploadStream::builder(store.clone())
        .bucket("secure-bucket")
        .key("big.bin")
        .config(config)
        .build()
        .unwrap();
    let data = pattern(2 * part + 3);

    stream.write(&data).await.unwrap();
    stream.close().await.unwrap();

    assert_eq!(store.part_sizes(), vec![part, part, 3]);
    assert_eq!(store.object("secure-bucket", "big.bin").unwrap(), data);
}

#[tokio::test]
async fn test_unencrypted_store_cuts_at_threshold() {
    let store = Arc::new(MemoryMultipartStore::new());
    let stream = UploadStream::builder(store.clone())
        .bucket("plain-bucket")
        .key("plain.bin")
        .build()
        .unwrap();

    stream.write(&pattern(MIN_PART_SIZE)).await.unwrap();
    assert_eq!(store.part_sizes(), vec![MIN_PART_SIZE]);
    stream.close().await.unwrap();
    assert_eq!(store.part_sizes(), vec![MIN_PART_SIZE, 0]);
}
