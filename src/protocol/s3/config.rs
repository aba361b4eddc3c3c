//! Configuration types for the S3 client

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::protocol::error::{StorageError, StorageResult};
use crate::protocol::types::{InitiateRequest, ServerSideEncryption, StorageClass};

/// S3 client configuration.
///
/// Connection settings apply to the client; the object settings (storage class,
/// encryption, headers, metadata, ACL) are defaults stamped onto every upload
/// request that does not set them itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// AWS region (e.g., "us-east-1")
    pub region: Option<String>,

    /// Custom endpoint URL (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,

    /// AWS access key ID (optional - uses credential chain if not provided)
    pub access_key: Option<String>,

    /// AWS secret access key (optional - uses credential chain if not provided)
    pub secret_key: Option<String>,

    /// Session token (for temporary credentials)
    pub session_token: Option<String>,

    /// AWS profile name to use
    pub aws_profile: Option<String>,

    /// Path-style addressing (required for some S3-compatible services)
    pub force_path_style: bool,

    /// Per-request operation timeout in seconds
    pub timeout_seconds: u64,

    /// Default storage class for uploads
    pub storage_class: StorageClass,

    /// Server-side encryption requested for uploads
    pub server_side_encryption: ServerSideEncryption,

    /// Content-Type for uploads
    pub content_type: Option<String>,

    /// Content-Encoding for uploads
    pub content_encoding: Option<String>,

    /// Content-Disposition for uploads
    pub content_disposition: Option<String>,

    /// Cache-Control for uploads
    pub cache_control: Option<String>,

    /// User-defined metadata key=value pairs
    pub user_metadata: HashMap<String, String>,

    /// Canned ACL (e.g., private, public-read, bucket-owner-full-control)
    pub acl: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            aws_profile: None,
            force_path_style: false,
            timeout_seconds: 300,
            storage_class: StorageClass::Standard,
            server_side_encryption: ServerSideEncryption::None,
            content_type: None,
            content_encoding: None,
            content_disposition: None,
            cache_control: None,
            user_metadata: HashMap::new(),
            acl: None,
        }
    }
}

impl S3Config {
    /// Start building a configuration
    pub fn builder() -> S3ConfigBuilder {
        S3ConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> StorageResult<()> {
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(StorageError::InvalidConfig(
                "Both access_key and secret_key must be provided together".to_string(),
            ));
        }

        if self.session_token.is_some() && self.access_key.is_none() {
            return Err(StorageError::InvalidConfig(
                "session_token requires access_key and secret_key".to_string(),
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(StorageError::InvalidConfig(
                "timeout_seconds must be greater than zero".to_string(),
            ));
        }

        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(StorageError::InvalidConfig(format!(
                    "Endpoint must be an http(s) URL: {}",
                    endpoint
                )));
            }
        }

        Ok(())
    }

    /// Check if using custom endpoint (S3-compatible service)
    pub fn is_custom_endpoint(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Check if using explicit credentials
    pub fn has_explicit_credentials(&self) -> bool {
        self.access_key.is_some() && self.secret_key.is_some()
    }

    /// Build an upload request for `bucket`/`key` carrying this config's object
    /// settings
    pub fn initiate_request(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> InitiateRequest {
        InitiateRequest {
            bucket: bucket.into(),
            key: key.into(),
            content_type: self.content_type.clone(),
            content_encoding: self.content_encoding.clone(),
            content_disposition: self.content_disposition.clone(),
            cache_control: self.cache_control.clone(),
            acl: self.acl.clone(),
            storage_class: self.storage_class,
            server_side_encryption: self.server_side_encryption.clone(),
            metadata: self.user_metadata.clone(),
        }
    }
}

/// Builder for S3Config
#[derive(Debug, Clone, Default)]
pub struct S3ConfigBuilder {
    config: S3Config,
}

impl S3ConfigBuilder {
    /// Set the AWS region
    pub fn region(mut self, region: String) -> Self {
        self.config.region = Some(region);
        self
    }

    /// Set custom endpoint (for MinIO, LocalStack, etc.)
    pub fn endpoint(mut self, endpoint: String) -> Self {
        self.config.endpoint = Some(endpoint);
        self
    }

    /// Set AWS credentials explicitly
    pub fn credentials(mut self, access_key: String, secret_key: String) -> Self {
        self.config.access_key = Some(access_key);
        self.config.secret_key = Some(secret_key);
        self
    }

    /// Set session token (for temporary credentials)
    pub fn session_token(mut self, token: String) -> Self {
        self.config.session_token = Some(token);
        self
    }

    /// Set AWS profile name
    pub fn aws_profile(mut self, profile: String) -> Self {
        self.config.aws_profile = Some(profile);
        self
    }

    /// Enable path-style addressing
    pub fn force_path_style(mut self, force: bool) -> Self {
        self.config.force_path_style = force;
        self
    }

    /// Set request timeout
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.timeout_seconds = seconds;
        self
    }

    /// Set default storage class
    pub fn storage_class(mut self, storage_class: StorageClass) -> Self {
        self.config.storage_class = storage_class;
        self
    }

    /// Set server-side encryption
    pub fn server_side_encryption(mut self, sse: ServerSideEncryption) -> Self {
        self.config.server_side_encryption = sse;
        self
    }

    pub fn content_type(mut self, content_type: String) -> Self {
        self.config.content_type = Some(content_type);
        self
    }

    pub fn content_encoding(mut self, content_encoding: String) -> Self {
        self.config.content_encoding = Some(content_encoding);
        self
    }

    pub fn content_disposition(mut self, content_disposition: String) -> Self {
        self.config.content_disposition = Some(content_disposition);
        self
    }

    pub fn cache_control(mut self, cache_control: String) -> Self {
        self.config.cache_control = Some(cache_control);
        self
    }

    /// Set user-defined metadata
    pub fn user_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.config.user_metadata = metadata;
        self
    }

    /// Set canned ACL for uploads
    pub fn acl(mut self, acl: String) -> Self {
        self.config.acl = Some(acl);
        self
    }

    /// Build the configuration
    pub fn build(self) -> StorageResult<S3Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
