//! Native S3 protocol implementation
//!
//! Drives multipart uploads against AWS S3 and S3-compatible services (MinIO,
//! LocalStack, ...) using the official AWS SDK for Rust. Every call except abort
//! races the stream's cancellation token, so a cancelled upload stops waiting
//! on the network immediately.
//!
//! # Using MinIO or S3-Compatible Storage
//!
//! ```no_run
//! use upstream_s3::protocol::s3::{S3Client, S3Config};
//!
//! # async fn connect() -> Result<S3Client, Box<dyn std::error::Error>> {
//! let config = S3Config::builder()
//!     .endpoint("http://localhost:9000".to_string())
//!     .region("us-east-1".to_string()) // Required even for MinIO
//!     .credentials("minioadmin".to_string(), "minioadmin".to_string())
//!     .force_path_style(true)
//!     .build()?;
//!
//! let client = S3Client::new(config).await?;
//! # Ok(client)
//! # }
//! ```

mod client;
mod config;
mod multipart;

pub use client::S3Client;
pub use config::{S3Config, S3ConfigBuilder};
