//! S3 storage backend implementation.

use object_store::aws::AmazonS3Builder;
use object_store::multipart::MultipartStore;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::sync::Arc;

use crate::error::{S3ConfigSnafu, StorageError};

use super::StorageProvider;

/// How the S3 client authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum S3Credentials {
    /// Resolve credentials from the environment (instance profile, env vars).
    #[default]
    Default,
    /// Explicit static keys.
    Keys {
        access_key: String,
        secret_key: String,
    },
}

/// Client settings for an S3-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct S3ClientSettings {
    pub credentials: S3Credentials,
    pub region: Option<String>,
    /// Non-AWS endpoint (MinIO, Ceph RadosGW, proxies in tests).
    pub endpoint: Option<String>,
    /// Address the bucket as a virtual host instead of path-style.
    pub virtual_host_bucket: bool,
}

impl StorageProvider {
    /// Create a provider for one bucket on an S3-compatible store.
    pub fn s3(bucket: &str, settings: &S3ClientSettings) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_retry(RetryConfig::default());

        if let S3Credentials::Keys {
            access_key,
            secret_key,
        } = &settings.credentials
        {
            builder = builder
                .with_access_key_id(access_key)
                .with_secret_access_key(secret_key);
        }

        if let Some(region) = &settings.region {
            builder = builder.with_region(region);
        }

        if let Some(endpoint) = &settings.endpoint {
            // Custom endpoints are typically plain HTTP and path-addressed
            // unless the deployment opts into virtual-host addressing.
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(settings.virtual_host_bucket)
                .with_allow_http(true);
        }

        let canonical_url = match (&settings.endpoint, &settings.region) {
            (Some(endpoint), _) => format!("{endpoint}/{bucket}"),
            (None, Some(region)) => format!("https://s3.{region}.amazonaws.com/{bucket}"),
            (None, None) => format!("https://s3.amazonaws.com/{bucket}"),
        };

        let s3_store = Arc::new(builder.build().context(S3ConfigSnafu)?);
        // S3 supports MultipartStore for explicit part numbering
        let multipart_store: Option<Arc<dyn MultipartStore>> = Some(s3_store.clone());
        let object_store: Arc<dyn ObjectStore> = s3_store;

        Ok(Self::new(object_store, multipart_store, canonical_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_static_keys_and_endpoint() {
        let settings = S3ClientSettings {
            credentials: S3Credentials::Keys {
                access_key: "AKIA".to_string(),
                secret_key: "secret".to_string(),
            },
            region: Some("eu-west-1".to_string()),
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            virtual_host_bucket: false,
        };

        let provider = StorageProvider::s3("test-bucket", &settings).unwrap();
        assert_eq!(provider.canonical_url(), "http://127.0.0.1:9000/test-bucket");
    }

    #[test]
    fn builds_with_default_credential_chain() {
        let settings = S3ClientSettings {
            region: Some("us-east-1".to_string()),
            ..Default::default()
        };

        let provider = StorageProvider::s3("test-bucket", &settings).unwrap();
        assert_eq!(
            provider.canonical_url(),
            "https://s3.us-east-1.amazonaws.com/test-bucket"
        );
    }
}
