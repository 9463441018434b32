use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, http::HttpResponse},
    error::{DisplayErrorContext, SdkError},
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
};
use bytes::Bytes;
use tracing::info;
use url::Url;

use crate::config::StorageSettings;

use super::{ObjectReader, ObjectStore, StorageError};

const CREDENTIALS_PROVIDER: &str = "texforge-static";
const DEFAULT_SIGNING_REGION: &str = "us-east-1";

/// [`ObjectStore`] backed by any S3-compatible service (MinIO, AWS, ...).
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    region: Option<String>,
}

impl S3ObjectStore {
    pub fn new(settings: &StorageSettings) -> Result<Self, StorageError> {
        let endpoint = normalize_endpoint(&settings.endpoint, settings.secure)?;
        let signing_region = settings
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_SIGNING_REGION.to_string());
        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(endpoint.as_str().trim_end_matches('/'))
            .region(Region::new(signing_region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        info!(
            target = "texforge::storage",
            endpoint = %endpoint,
            bucket = %settings.bucket,
            "S3 client configured"
        );

        Ok(Self {
            client: Client::from_conf(config),
            bucket: settings.bucket.clone(),
            region: settings.region.clone(),
        })
    }

    fn location_constraint(&self) -> Option<CreateBucketConfiguration> {
        let region = self.region.as_deref()?;
        if region == DEFAULT_SIGNING_REGION {
            return None;
        }
        Some(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region))
                .build(),
        )
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool, StorageError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err)
                if err.as_service_error().is_some_and(|e| e.is_not_found())
                    || status_of(&err) == Some(404) =>
            {
                Ok(false)
            }
            Err(err) => Err(backend_error("head_bucket", &err)),
        }
    }

    async fn create_bucket(&self) -> Result<(), StorageError> {
        let request = self
            .client
            .create_bucket()
            .bucket(&self.bucket)
            .set_create_bucket_configuration(self.location_constraint());

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err)
                if err.as_service_error().is_some_and(|e| {
                    e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()
                }) =>
            {
                Ok(())
            }
            Err(err) => Err(backend_error("create_bucket", &err)),
        }
    }

    async fn object_exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err)
                if err.as_service_error().is_some_and(|e| e.is_not_found())
                    || status_of(&err) == Some(404) =>
            {
                Ok(false)
            }
            Err(err) => Err(backend_error("head_object", &err)),
        }
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let length = i64::try_from(body.len())
            .map_err(|_| StorageError::backend("put_object", "object size exceeds i64"))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(length)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| backend_error("put_object", &err))?;

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<ObjectReader, StorageError> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Box::pin(output.body.into_async_read())),
            Err(err)
                if err.as_service_error().is_some_and(|e| e.is_no_such_key())
                    || status_of(&err) == Some(404) =>
            {
                Err(StorageError::not_found(key))
            }
            Err(err) => Err(backend_error("get_object", &err)),
        }
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|err| StorageError::backend("presign_get", err.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| backend_error("presign_get", &err))?;

        Ok(request.uri().to_string())
    }
}

/// Turn the configured endpoint into a base URL.
///
/// `host:port` endpoints pick their scheme from `secure`. Endpoints carrying a
/// scheme use TLS when the scheme is `https` or `secure` is set.
pub fn normalize_endpoint(endpoint: &str, secure: bool) -> Result<Url, StorageError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(StorageError::Configuration(
            "storage endpoint must not be empty".to_string(),
        ));
    }

    let (authority, tls) = match trimmed.split_once("://") {
        Some((_, rest)) => {
            let parsed = Url::parse(trimmed).map_err(|err| {
                StorageError::Configuration(format!("invalid endpoint `{trimmed}`: {err}"))
            })?;
            let host = parsed.host_str().ok_or_else(|| {
                StorageError::Configuration(format!("endpoint `{trimmed}` has no host"))
            })?;
            // `Url` hides ports equal to the scheme default; a spelled-out port
            // must survive a scheme change.
            let port = if has_explicit_port(rest) {
                parsed.port_or_known_default()
            } else {
                parsed.port()
            };
            let authority = match port {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            (authority, parsed.scheme() == "https" || secure)
        }
        None => (trimmed.trim_end_matches('/').to_string(), secure),
    };

    let scheme = if tls { "https" } else { "http" };
    Url::parse(&format!("{scheme}://{authority}")).map_err(|err| {
        StorageError::Configuration(format!("invalid endpoint `{trimmed}`: {err}"))
    })
}

fn has_explicit_port(after_scheme: &str) -> bool {
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    match host_port.rsplit_once(':') {
        Some((host, port)) => {
            !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
                && (!host.starts_with('[') || host.ends_with(']'))
        }
        None => false,
    }
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

fn backend_error<E>(op: &'static str, err: &SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + 'static,
{
    StorageError::backend(op, DisplayErrorContext(err).to_string())
}
