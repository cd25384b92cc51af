//! S3-compatible object storage (AWS, MinIO, R2).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use std::path::Path;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::StorageBackend;
use crate::config::S3Settings;
use crate::pipeline::stages::artifact_file_name;
use crate::{Error, Result};

/// Validity of signed retrieval URLs.
pub const PRESIGNED_URL_TTL: Duration = Duration::from_secs(3600);

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Region that must not be sent as a location constraint.
const DEFAULT_AWS_REGION: &str = "us-east-1";

fn build_client(settings: &S3Settings, endpoint: Option<&str>) -> S3Client {
    let creds = aws_sdk_s3::config::Credentials::new(
        &settings.access_key_id,
        &settings.secret_access_key,
        None,
        None,
        "repodoc",
    );

    let mut builder = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(aws_sdk_s3::config::Region::new(settings.region.clone()))
        .credentials_provider(creds)
        .force_path_style(true);
    if let Some(endpoint) = endpoint {
        builder = builder.endpoint_url(endpoint);
    }

    S3Client::from_conf(builder.build())
}

/// Uploads artifacts and returns presigned download links.
pub struct S3Storage {
    client: S3Client,
    /// Signs URLs against the publicly reachable endpoint.
    presign_client: S3Client,
    bucket: String,
    region: String,
    bucket_ready: OnceCell<()>,
}

impl S3Storage {
    pub fn new(settings: &S3Settings) -> Self {
        let client = build_client(settings, settings.endpoint_url.as_deref());
        let presign_client = match (&settings.public_endpoint_url, &settings.endpoint_url) {
            (Some(public), Some(internal)) if public != internal => {
                build_client(settings, Some(public))
            }
            _ => client.clone(),
        };

        Self {
            client,
            presign_client,
            bucket: settings.bucket.clone(),
            region: settings.region.clone(),
            bucket_ready: OnceCell::new(),
        }
    }

    /// Create the bucket unless it exists. Runs at most once successfully per process.
    async fn ensure_bucket(&self) -> Result<()> {
        self.bucket_ready
            .get_or_try_init(|| async {
                let mut request = self.client.create_bucket().bucket(&self.bucket);
                if self.region != DEFAULT_AWS_REGION {
                    request = request.create_bucket_configuration(
                        CreateBucketConfiguration::builder()
                            .location_constraint(BucketLocationConstraint::from(
                                self.region.as_str(),
                            ))
                            .build(),
                    );
                }

                match request.send().await {
                    Ok(_) => {
                        info!(bucket = %self.bucket, "Created bucket");
                        Ok(())
                    }
                    Err(e) => {
                        let exists = e.as_service_error().is_some_and(|se| {
                            se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists()
                        });
                        if exists {
                            debug!(bucket = %self.bucket, "Bucket already exists");
                            Ok(())
                        } else {
                            Err(Error::Upload(format!(
                                "Failed to create bucket {}: {}",
                                self.bucket,
                                DisplayErrorContext(&e)
                            )))
                        }
                    }
                }
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn store(&self, artifact: &Path, job_id: &str) -> Result<String> {
        self.ensure_bucket().await?;

        let key = artifact_file_name(job_id);
        let body = tokio::fs::read(artifact)
            .await
            .map_err(|e| Error::Upload(format!("Failed to read {}: {}", artifact.display(), e)))?;
        let size = body.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type(ARCHIVE_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| {
                Error::Upload(format!(
                    "Failed to upload {}: {}",
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        let presigning = PresigningConfig::expires_in(PRESIGNED_URL_TTL)
            .map_err(|e| Error::Upload(format!("Invalid presigning config: {}", e)))?;
        let presigned = self
            .presign_client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .presigned(presigning)
            .await
            .map_err(|e| {
                Error::Upload(format!(
                    "Failed to sign URL for {}: {}",
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        info!(job_id = %job_id, bucket = %self.bucket, key = %key, size, "Uploaded artifact");
        Ok(presigned.uri().to_string())
    }

    fn name(&self) -> &'static str {
        "object-storage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> S3Settings {
        S3Settings {
            endpoint_url: Some("http://minio:9000".into()),
            public_endpoint_url: Some("http://localhost:9000".into()),
            access_key_id: "minio".into(),
            secret_access_key: "minio123".into(),
            region: "us-east-1".into(),
            bucket: "codebase-docs".into(),
        }
    }

    #[tokio::test]
    async fn presigned_urls_use_public_endpoint() {
        let storage = S3Storage::new(&settings());
        let presigned = storage
            .presign_client
            .get_object()
            .bucket(&storage.bucket)
            .key(artifact_file_name("j1"))
            .presigned(PresigningConfig::expires_in(PRESIGNED_URL_TTL).unwrap())
            .await
            .unwrap();
        let uri = presigned.uri().to_string();

        assert!(uri.starts_with("http://localhost:9000/codebase-docs/docs_j1.zip?"));
        assert!(uri.contains("X-Amz-Expires=3600"));
    }

    #[tokio::test]
    async fn missing_artifact_is_upload_error() {
        let storage = S3Storage::new(&settings());
        // Pretend provisioning already happened so no network call is made.
        storage.bucket_ready.set(()).unwrap();
        let err = storage
            .store(Path::new("/definitely/not/here.zip"), "j1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upload(_)));
    }
}
