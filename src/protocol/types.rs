//! Request and response types for the multipart protocol

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::stream::events::PartProgress;

/// Storage classes accepted when initiating an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    /// Standard storage class
    #[default]
    Standard,

    /// Reduced redundancy (deprecated but still available)
    ReducedRedundancy,

    /// Infrequent access
    StandardIa,

    /// One zone infrequent access
    OnezoneIa,

    /// Intelligent tiering
    IntelligentTiering,

    /// Glacier instant retrieval
    GlacierInstantRetrieval,

    /// Glacier flexible retrieval
    GlacierFlexibleRetrieval,

    /// Glacier deep archive
    GlacierDeepArchive,
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::ReducedRedundancy => "REDUCED_REDUNDANCY",
            StorageClass::StandardIa => "STANDARD_IA",
            StorageClass::OnezoneIa => "ONEZONE_IA",
            StorageClass::IntelligentTiering => "INTELLIGENT_TIERING",
            StorageClass::GlacierInstantRetrieval => "GLACIER_IR",
            StorageClass::GlacierFlexibleRetrieval => "GLACIER",
            StorageClass::GlacierDeepArchive => "DEEP_ARCHIVE",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for StorageClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "STANDARD" => Ok(StorageClass::Standard),
            "REDUCED_REDUNDANCY" => Ok(StorageClass::ReducedRedundancy),
            "STANDARD_IA" => Ok(StorageClass::StandardIa),
            "ONEZONE_IA" => Ok(StorageClass::OnezoneIa),
            "INTELLIGENT_TIERING" => Ok(StorageClass::IntelligentTiering),
            "GLACIER_IR" => Ok(StorageClass::GlacierInstantRetrieval),
            "GLACIER" => Ok(StorageClass::GlacierFlexibleRetrieval),
            "DEEP_ARCHIVE" => Ok(StorageClass::GlacierDeepArchive),
            other => Err(format!("unknown storage class: {}", other)),
        }
    }
}

/// Server-side encryption method, either requested or reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerSideEncryption {
    /// AES256 encryption
    Aes256,

    /// AWS KMS encryption
    AwsKms { key_id: Option<String> },

    /// No encryption
    #[default]
    None,
}

impl ServerSideEncryption {
    /// Whether this method actually encrypts the object at rest
    pub fn is_active(&self) -> bool {
        !matches!(self, ServerSideEncryption::None)
    }
}

/// Everything needed to start a multipart upload.
///
/// This is the "prebuilt initiate request" form of an upload target; a plain
/// bucket + key is converted with [`InitiateRequest::new`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitiateRequest {
    /// Target bucket
    pub bucket: String,

    /// Target object key
    pub key: String,

    /// Content-Type of the resulting object
    pub content_type: Option<String>,

    /// Content-Encoding of the resulting object
    pub content_encoding: Option<String>,

    /// Content-Disposition of the resulting object
    pub content_disposition: Option<String>,

    /// Cache-Control of the resulting object
    pub cache_control: Option<String>,

    /// Canned ACL (e.g. private, bucket-owner-full-control)
    pub acl: Option<String>,

    /// Storage class
    #[serde(default)]
    pub storage_class: StorageClass,

    /// Requested server-side encryption
    #[serde(default)]
    pub server_side_encryption: ServerSideEncryption,

    /// User-defined metadata key=value pairs
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl InitiateRequest {
    /// Create a request for a bucket and key with default options
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Default::default()
        }
    }

    /// Check the bucket naming rules and that a key is present
    pub fn validate(&self) -> Result<(), String> {
        if self.bucket.is_empty() {
            return Err("Bucket name cannot be empty".to_string());
        }
        if !is_valid_bucket_name(&self.bucket) {
            return Err(format!(
                "Invalid bucket name: {}. Bucket names must be 3-63 characters, \
                 lowercase letters, numbers, hyphens, and periods only",
                self.bucket
            ));
        }
        if self.key.is_empty() {
            return Err("Object key cannot be empty".to_string());
        }
        if self.key.len() > 1024 {
            return Err(format!(
                "Object key is {} bytes, above the 1024 byte limit",
                self.key.len()
            ));
        }
        Ok(())
    }
}

/// Validate a bucket name according to AWS rules
pub fn is_valid_bucket_name(name: &str) -> bool {
    if !(3..=63).contains(&name.len()) {
        return false;
    }

    let bytes = name.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return false;
    }

    if !bytes
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return false;
    }

    if name.contains("..") {
        return false;
    }

    // Cannot be formatted as an IP address
    if name.split('.').count() == 4 && name.split('.').all(|s| s.parse::<u8>().is_ok()) {
        return false;
    }

    !name.starts_with("xn--") && !name.ends_with("-s3alias")
}

/// Response of a successful initiate call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateResponse {
    /// Upload id assigned by the store
    pub upload_id: String,

    /// Bucket the upload was created in
    pub bucket: String,

    /// Key the upload was created for
    pub key: String,

    /// Encryption the store applies to this upload
    pub server_side_encryption: ServerSideEncryption,
}

/// A single part transmission
#[derive(Clone)]
pub struct UploadPartRequest {
    /// Target bucket
    pub bucket: String,

    /// Target object key
    pub key: String,

    /// Upload id returned by initiate
    pub upload_id: String,

    /// Part number (1-indexed)
    pub part_number: i32,

    /// Part payload
    pub body: Bytes,

    /// Whether this is the final part of the upload
    pub is_last_part: bool,

    /// Transfer progress sink, present only while someone listens for parts
    pub progress: Option<PartProgress>,
}

impl fmt::Debug for UploadPartRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadPartRequest")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("upload_id", &self.upload_id)
            .field("part_number", &self.part_number)
            .field("size", &self.body.len())
            .field("is_last_part", &self.is_last_part)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Acknowledgement of an uploaded part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPartInfo {
    /// Part number (1-indexed)
    pub part_number: i32,

    /// ETag of the uploaded part
    pub etag: String,

    /// Size of the part in bytes
    pub size: usize,
}

impl UploadPartInfo {
    /// Create a new upload part info
    pub fn new(part_number: i32, etag: String, size: usize) -> Self {
        Self {
            part_number,
            etag,
            size,
        }
    }
}

/// Request to stitch acknowledged parts into the final object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteRequest {
    /// Target bucket
    pub bucket: String,

    /// Target object key
    pub key: String,

    /// Upload id returned by initiate
    pub upload_id: String,

    /// Acknowledged parts, ascending by part number
    pub parts: Vec<UploadPartInfo>,
}

/// Receipt of a completed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteReceipt {
    /// Bucket of the final object
    pub bucket: String,

    /// Key of the final object
    pub key: String,

    /// ETag of the final object, if reported
    pub etag: Option<String>,

    /// Location URL, if reported
    pub location: Option<String>,

    /// Version id, if the bucket is versioned
    pub version_id: Option<String>,
}

/// Request to discard an upload and all of its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortRequest {
    /// Target bucket
    pub bucket: String,

    /// Target object key
    pub key: String,

    /// Upload id returned by initiate
    pub upload_id: String,
}

/// Receipt of an aborted upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReceipt {
    /// Bucket of the aborted upload
    pub bucket: String,

    /// Key of the aborted upload
    pub key: String,

    /// Upload id that was aborted
    pub upload_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_class_display() {
        assert_eq!(StorageClass::Standard.to_string(), "STANDARD");
        assert_eq!(StorageClass::StandardIa.to_string(), "STANDARD_IA");
        assert_eq!(StorageClass::GlacierInstantRetrieval.to_string(), "GLACIER_IR");
    }

    #[test]
    fn test_storage_class_parse() {
        assert_eq!(
            "standard-ia".parse::<StorageClass>().unwrap(),
            StorageClass::StandardIa
        );
        assert_eq!(
            "DEEP_ARCHIVE".parse::<StorageClass>().unwrap(),
            StorageClass::GlacierDeepArchive
        );
        assert!("tape".parse::<StorageClass>().is_err());
    }

    #[test]
    fn test_encryption_is_active() {
        assert!(ServerSideEncryption::Aes256.is_active());
        assert!(ServerSideEncryption::AwsKms { key_id: None }.is_active());
        assert!(!ServerSideEncryption::None.is_active());
    }

    #[test]
    fn test_initiate_request_defaults() {
        let req = InitiateRequest::new("bucket", "logs/today.ndjson");
        assert_eq!(req.bucket, "bucket");
        assert_eq!(req.key, "logs/today.ndjson");
        assert_eq!(req.storage_class, StorageClass::Standard);
        assert_eq!(req.server_side_encryption, ServerSideEncryption::None);
        assert!(req.metadata.is_empty());
    }

    #[test]
    fn test_valid_bucket_names() {
        assert!(is_valid_bucket_name("my-bucket"));
        assert!(is_valid_bucket_name("my.bucket"));
        assert!(is_valid_bucket_name("abc"));
        assert!(is_valid_bucket_name("a".repeat(63).as_str()));
    }

    #[test]
    fn test_invalid_bucket_names() {
        assert!(!is_valid_bucket_name("ab"));
        assert!(!is_valid_bucket_name(&"a".repeat(64)));
        assert!(!is_valid_bucket_name("My-Bucket"));
        assert!(!is_valid_bucket_name("my_bucket"));
        assert!(!is_valid_bucket_name("my..bucket"));
        assert!(!is_valid_bucket_name("192.168.1.1"));
        assert!(!is_valid_bucket_name("xn--bucket"));
        assert!(!is_valid_bucket_name("bucket-s3alias"));
        assert!(!is_valid_bucket_name("-bucket"));
        assert!(!is_valid_bucket_name("bucket-"));
    }

    #[test]
    fn test_request_validation() {
        assert!(InitiateRequest::new("my-bucket", "a/b.bin").validate().is_ok());
        assert!(InitiateRequest::new("my-bucket", "").validate().is_err());
        assert!(InitiateRequest::new("", "key").validate().is_err());
        assert!(InitiateRequest::new("my-bucket", "k".repeat(1025))
            .validate()
            .is_err());
    }

    #[test]
    fn test_part_request_debug_hides_body() {
        let req = UploadPartRequest {
            bucket: "b".to_string(),
            key: "k".to_string(),
            upload_id: "u".to_string(),
            part_number: 2,
            body: Bytes::from_static(b"secret payload"),
            is_last_part: false,
            progress: None,
        };
        let dbg = format!("{:?}", req);
        assert!(dbg.contains("size: 14"));
        assert!(!dbg.contains("secret"));
    }
}
