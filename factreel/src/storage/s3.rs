//! AWS SDK implementation of [`ObjectStore`].

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use std::time::Duration;

use super::{ObjectStore, PutReceipt, SERVICE};
use crate::errors::{kind_for_status, ErrorKind, ExternalError};

/// Object store backed by S3.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Loads credentials from the default provider chain for `region`.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: Client::new(&config),
        }
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn classify<E>(operation: &str, err: &SdkError<E, HttpResponse>) -> ExternalError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let kind = match err {
        SdkError::ConstructionFailure(_) => ErrorKind::Local,
        SdkError::ServiceError(_) => err
            .raw_response()
            .map_or(ErrorKind::Rejected, |r| kind_for_status(r.status().as_u16())),
        _ => ErrorKind::Transient,
    };
    ExternalError::new(SERVICE, kind, format!("{operation}: {}", DisplayErrorContext(err)))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<PutReceipt, ExternalError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| ExternalError::local(SERVICE, format!("Cannot stream file: {e}")))?;

        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| classify("PutObject", &e))?;

        Ok(PutReceipt {
            etag: output.e_tag().map(str::to_string),
        })
    }

    async fn get_to_file(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<u64, ExternalError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("GetObject", &e))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| ExternalError::transient(SERVICE, format!("GetObject body: {e}")))?
            .into_bytes();

        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| ExternalError::local(SERVICE, format!("Cannot write {}: {e}", dest.display())))?;
        Ok(bytes.len() as u64)
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ExternalError> {
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|e| ExternalError::local(SERVICE, format!("Presigning config: {e}")))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| classify("PresignGetObject", &e))?;
        Ok(request.uri().to_string())
    }
}
