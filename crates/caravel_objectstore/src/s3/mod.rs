use std::sync::Arc;

use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use serde::Deserialize;

use caravel_core::{Provider, RegionTag};

use super::errors::{Error, Result};
use super::{ObjectStore, ObjectStoreFactory};

#[derive(Clone, Default, Deserialize)]
pub struct S3Config {
    /// Static credentials; when absent the ambient AWS environment is used.
    access_key: Option<String>,
    secret_key: Option<String>,
}

impl S3Config {
    pub fn new_factory(&self) -> S3Factory {
        S3Factory {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
        }
    }
}

/// Opens per-(region, bucket) [`S3`] handles.
#[derive(Clone)]
pub struct S3Factory {
    access_key: Option<String>,
    secret_key: Option<String>,
}

#[async_trait]
impl ObjectStoreFactory for S3Factory {
    async fn open(&self, region: &RegionTag, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        if region.provider() != Provider::Aws {
            return Err(Error::UnsupportedProvider(region.provider()));
        }

        let sdk_config = aws_config::load_from_env().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .region(Region::new(region.subregion().to_string()));

        if let (Some(access_key), Some(secret_key)) = (&self.access_key, &self.secret_key) {
            let scp = SharedCredentialsProvider::new(
                Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    "caravel",
                )
                .provide_credentials()
                .await?,
            );
            builder = builder.credentials_provider(scp);
        }

        Ok(Arc::new(S3 {
            bucket_name: bucket.to_string(),
            client: Client::from_conf(builder.build()),
        }))
    }
}

#[derive(Clone)]
pub struct S3 {
    bucket_name: String,
    client: Client,
}

#[async_trait]
impl ObjectStore for S3 {
    async fn initiate_multipart_upload(&self, key: &str) -> Result<String> {
        let create_multipart_upload_output = self
            .client
            .create_multipart_upload()
            .key(key)
            .bucket(&self.bucket_name)
            .send()
            .await?;

        let upload_id = create_multipart_upload_output
            .upload_id
            .ok_or_else(|| Error::MissingUploadId(key.to_string()))?;
        tracing::debug!(%key, %upload_id, "initiated multipart upload");

        Ok(upload_id)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[u32],
    ) -> Result<()> {
        let mut mpu = CompletedMultipartUpload::builder();
        for part_number in parts {
            mpu = mpu.parts(
                CompletedPart::builder()
                    .part_number(*part_number as i32)
                    .build(),
            );
        }
        let _complete_multipart_upload_output = self
            .client
            .complete_multipart_upload()
            .multipart_upload(mpu.build())
            .upload_id(upload_id)
            .key(key)
            .bucket(&self.bucket_name)
            .send()
            .await?;
        tracing::debug!(%key, %upload_id, parts = parts.len(), "completed multipart upload");

        Ok(())
    }
}
