//! ObjectStore errors

use thiserror;

use caravel_core::Provider;

pub type Result<T> = std::result::Result<T, Error>;

/// General purpose [`super::ObjectStore`] error handling.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("aws sdk create multipart upload error")]
    AWSSDKCreateMultipartUploadError(
        #[from]
        aws_sdk_s3::error::SdkError<
            aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadError,
        >,
    ),
    #[error("aws sdk complete multipart upload error")]
    AWSSDKCompleteMultipartUploadError(
        #[from]
        aws_sdk_s3::error::SdkError<
            aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadError,
        >,
    ),
    #[error("aws sdk credentials error")]
    AWSSDKCredentialsError(#[from] aws_credential_types::provider::error::CredentialsError),

    #[error("store returned no upload id for key: {0}")]
    MissingUploadId(String),

    #[error("no object store backend for provider: {0}")]
    UnsupportedProvider(Provider),
}
