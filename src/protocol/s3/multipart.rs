//! Multipart protocol calls against S3

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::S3Client;
use crate::protocol::error::{StorageError, StorageResult};
use crate::protocol::types::{
    AbortReceipt, AbortRequest, CompleteReceipt, CompleteRequest, InitiateRequest,
    InitiateResponse, ServerSideEncryption, StorageClass, UploadPartInfo, UploadPartRequest,
};
use crate::protocol::MultipartOperations;

/// Convert to the AWS SDK storage class
pub(crate) fn to_aws_storage_class(class: StorageClass) -> aws_sdk_s3::types::StorageClass {
    use aws_sdk_s3::types::StorageClass as Aws;
    match class {
        StorageClass::Standard => Aws::Standard,
        StorageClass::ReducedRedundancy => Aws::ReducedRedundancy,
        StorageClass::StandardIa => Aws::StandardIa,
        StorageClass::OnezoneIa => Aws::OnezoneIa,
        StorageClass::IntelligentTiering => Aws::IntelligentTiering,
        StorageClass::GlacierInstantRetrieval => Aws::GlacierIr,
        StorageClass::GlacierFlexibleRetrieval => Aws::Glacier,
        StorageClass::GlacierDeepArchive => Aws::DeepArchive,
    }
}

/// Convert to the AWS SDK encryption header; `None` sends no header
pub(crate) fn to_aws_sse(
    sse: &ServerSideEncryption,
) -> Option<aws_sdk_s3::types::ServerSideEncryption> {
    match sse {
        ServerSideEncryption::Aes256 => Some(aws_sdk_s3::types::ServerSideEncryption::Aes256),
        ServerSideEncryption::AwsKms { .. } => {
            Some(aws_sdk_s3::types::ServerSideEncryption::AwsKms)
        }
        ServerSideEncryption::None => None,
    }
}

/// Interpret the encryption S3 reports for a new upload
pub(crate) fn from_aws_sse(
    sse: Option<&aws_sdk_s3::types::ServerSideEncryption>,
    kms_key_id: Option<&str>,
) -> ServerSideEncryption {
    use aws_sdk_s3::types::ServerSideEncryption as Aws;
    match sse {
        Some(Aws::Aes256) => ServerSideEncryption::Aes256,
        Some(Aws::AwsKms) | Some(Aws::AwsKmsDsse) => ServerSideEncryption::AwsKms {
            key_id: kms_key_id.map(str::to_string),
        },
        // Unknown algorithms still encrypt
        Some(_) => ServerSideEncryption::Aes256,
        None => ServerSideEncryption::None,
    }
}

/// Race a request against the cancellation token
async fn cancellable<T, F>(cancel: &CancellationToken, request: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled),
        result = request => result,
    }
}

fn upload_error(err: StorageError, bucket: &str, key: &str, upload_id: &str) -> StorageError {
    match err {
        StorageError::Service { ref code, .. } if code == "NoSuchUpload" => {
            StorageError::NoSuchUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id: upload_id.to_string(),
            }
        }
        StorageError::Service { ref code, .. } if code == "NoSuchBucket" => {
            StorageError::BucketNotFound(bucket.to_string())
        }
        other => other,
    }
}

#[async_trait]
impl MultipartOperations for S3Client {
    #[tracing::instrument(skip(self, request, cancel), fields(otel.kind = "client", backend = "s3", bucket = %request.bucket, key = %request.key))]
    async fn initiate(
        &self,
        request: &InitiateRequest,
        cancel: &CancellationToken,
    ) -> StorageResult<InitiateResponse> {
        let mut builder = self
            .aws_client()
            .create_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .storage_class(to_aws_storage_class(request.storage_class));

        if let Some(sse) = to_aws_sse(&request.server_side_encryption) {
            builder = builder.server_side_encryption(sse);

            if let ServerSideEncryption::AwsKms { key_id: Some(kid) } =
                &request.server_side_encryption
            {
                builder = builder.ssekms_key_id(kid);
            }
        }

        if let Some(content_type) = &request.content_type {
            builder = builder.content_type(content_type);
        }
        if let Some(content_encoding) = &request.content_encoding {
            builder = builder.content_encoding(content_encoding);
        }
        if let Some(content_disposition) = &request.content_disposition {
            builder = builder.content_disposition(content_disposition);
        }
        if let Some(cache_control) = &request.cache_control {
            builder = builder.cache_control(cache_control);
        }
        if let Some(acl) = &request.acl {
            builder = builder.acl(ObjectCannedAcl::from(acl.as_str()));
        }
        for (k, v) in &request.metadata {
            builder = builder.metadata(k, v);
        }

        let response = cancellable(cancel, async {
            builder.send().await.map_err(StorageError::from)
        })
        .await
        .map_err(|e| upload_error(e, &request.bucket, &request.key, ""))?;

        let upload_id = response
            .upload_id()
            .ok_or_else(|| StorageError::MultipartUpload("No upload ID returned".to_string()))?
            .to_string();

        let server_side_encryption =
            from_aws_sse(response.server_side_encryption(), response.ssekms_key_id());

        debug!(upload_id = %upload_id, sse = ?server_side_encryption, "S3 multipart upload created");

        Ok(InitiateResponse {
            upload_id,
            bucket: response.bucket().unwrap_or(request.bucket.as_str()).to_string(),
            key: response.key().unwrap_or(request.key.as_str()).to_string(),
            server_side_encryption,
        })
    }

    #[tracing::instrument(skip(self, request, cancel), fields(otel.kind = "client", backend = "s3", part_number = request.part_number, size = request.body.len()))]
    async fn upload_part(
        &self,
        request: UploadPartRequest,
        cancel: &CancellationToken,
    ) -> StorageResult<UploadPartInfo> {
        let UploadPartRequest {
            bucket,
            key,
            upload_id,
            part_number,
            body,
            progress,
            ..
        } = request;
        let size = body.len();

        let send = self
            .aws_client()
            .upload_part()
            .bucket(&bucket)
            .key(&key)
            .upload_id(&upload_id)
            .part_number(part_number)
            .content_length(size as i64)
            .body(ByteStream::from(body))
            .send();

        let response = cancellable(cancel, async { send.await.map_err(StorageError::from) })
            .await
            .map_err(|e| upload_error(e, &bucket, &key, &upload_id))?;

        // The SDK exposes no per-chunk hook; the whole part is reported once sent
        if let Some(progress) = &progress {
            progress.advance(size as u64);
        }

        let etag = response
            .e_tag()
            .ok_or_else(|| StorageError::MultipartUpload("No ETag returned for part".to_string()))?
            .to_string();

        Ok(UploadPartInfo::new(part_number, etag, size))
    }

    #[tracing::instrument(skip(self, request, cancel), fields(otel.kind = "client", backend = "s3", upload_id = %request.upload_id, parts = request.parts.len()))]
    async fn complete(
        &self,
        request: CompleteRequest,
        cancel: &CancellationToken,
    ) -> StorageResult<CompleteReceipt> {
        let completed_parts: Vec<CompletedPart> = request
            .parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        let multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let send = self
            .aws_client()
            .complete_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .multipart_upload(multipart_upload)
            .send();

        let response = cancellable(cancel, async { send.await.map_err(StorageError::from) })
            .await
            .map_err(|e| upload_error(e, &request.bucket, &request.key, &request.upload_id))?;

        Ok(CompleteReceipt {
            bucket: response.bucket().unwrap_or(request.bucket.as_str()).to_string(),
            key: response.key().unwrap_or(request.key.as_str()).to_string(),
            etag: response.e_tag().map(str::to_string),
            location: response.location().map(str::to_string),
            version_id: response.version_id().map(str::to_string),
        })
    }

    #[tracing::instrument(skip(self, request), fields(otel.kind = "client", backend = "s3", upload_id = %request.upload_id))]
    async fn abort(&self, request: AbortRequest) -> StorageResult<AbortReceipt> {
        self.aws_client()
            .abort_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .send()
            .await
            .map_err(|e| {
                upload_error(
                    StorageError::from(e),
                    &request.bucket,
                    &request.key,
                    &request.upload_id,
                )
            })?;

        Ok(AbortReceipt {
            bucket: request.bucket,
            key: request.key,
            upload_id: request.upload_id,
        })
    }

    fn protocol_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::s3::S3Config;
    use bytes::Bytes;

    async fn offline_client() -> S3Client {
        let config = S3Config::builder()
            .region("us-east-1".to_string())
            .endpoint("http://127.0.0.1:9".to_string())
            .credentials("test-key".to_string(), "test-secret".to_string())
            .force_path_style(true)
            .timeout_seconds(1)
            .build()
            .unwrap();
        S3Client::new(config).await.unwrap()
    }

    #[test]
    fn test_storage_class_mapping() {
        assert_eq!(
            to_aws_storage_class(StorageClass::GlacierInstantRetrieval),
            aws_sdk_s3::types::StorageClass::GlacierIr
        );
        assert_eq!(
            to_aws_storage_class(StorageClass::Standard),
            aws_sdk_s3::types::StorageClass::Standard
        );
    }

    #[test]
    fn test_sse_mapping() {
        assert_eq!(to_aws_sse(&ServerSideEncryption::None), None);
        assert_eq!(
            to_aws_sse(&ServerSideEncryption::AwsKms { key_id: None }),
            Some(aws_sdk_s3::types::ServerSideEncryption::AwsKms)
        );

        let reported = from_aws_sse(
            Some(&aws_sdk_s3::types::ServerSideEncryption::AwsKms),
            Some("arn:aws:kms:key"),
        );
        assert_eq!(
            reported,
            ServerSideEncryption::AwsKms {
                key_id: Some("arn:aws:kms:key".to_string())
            }
        );
        assert_eq!(from_aws_sse(None, None), ServerSideEncryption::None);
        assert!(from_aws_sse(Some(&aws_sdk_s3::types::ServerSideEncryption::Aes256), None).is_active());
    }

    #[test]
    fn test_no_such_upload_mapping() {
        let err = upload_error(
            StorageError::Service {
                code: "NoSuchUpload".to_string(),
                message: "gone".to_string(),
            },
            "b",
            "k",
            "u-1",
        );
        assert!(matches!(err, StorageError::NoSuchUpload { ref upload_id, .. } if upload_id == "u-1"));
    }

    #[tokio::test]
    async fn test_cancelled_initiate_never_sends() {
        let client = offline_client().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .initiate(&InitiateRequest::new("test-bucket", "k"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_part_never_sends() {
        let client = offline_client().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = UploadPartRequest {
            bucket: "test-bucket".to_string(),
            key: "k".to_string(),
            upload_id: "u".to_string(),
            part_number: 1,
            body: Bytes::from_static(b"data"),
            is_last_part: true,
            progress: None,
        };
        let err = client.upload_part(request, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(client.protocol_name(), "s3");
    }
}
