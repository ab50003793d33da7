//! S3 object store
//!
//! The store location is the bucket and the object name is the key. A pinned
//! generation is sent as the S3 version id. Works against AWS S3 and
//! S3-compatible services (MinIO, Wasabi, DigitalOcean Spaces) through a
//! custom endpoint.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::Client;
use tracing::debug;

use super::{EncryptedObject, ObjectStore};
use crate::envelope::SealedDocument;
use crate::error::{Error, ResolveError, Result};
use crate::reference::{validate_location, ReferenceKey};
use crate::security::sanitize_error;

pub struct S3ObjectStore {
    client: Client,
    region: String,
    endpoint: Option<String>,
}

impl S3ObjectStore {
    pub async fn new(region: &str, endpoint: Option<&str>) -> Result<Self> {
        if let Some(endpoint) = endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                Error::backend(format!("invalid S3 endpoint '{}': {}", endpoint, e))
            })?;
        }
        let client = Self::create_client(region, endpoint).await;

        Ok(Self {
            client,
            region: region.to_string(),
            endpoint: endpoint.map(str::to_string),
        })
    }

    /// Wrap an already configured client
    pub fn from_client(client: Client) -> Self {
        let region = client
            .config()
            .region()
            .map(|r| r.to_string())
            .unwrap_or_default();
        Self {
            client,
            region,
            endpoint: None,
        }
    }

    async fn create_client(region: &str, endpoint: Option<&str>) -> Client {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint_url) = endpoint {
            debug!(endpoint = %endpoint_url, "using custom S3 endpoint");
            // Most S3-compatible services need path-style addressing
            builder = builder.endpoint_url(endpoint_url).force_path_style(true);
        }

        Client::from_conf(builder.build())
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &ReferenceKey) -> std::result::Result<EncryptedObject, ResolveError> {
        key.validate()?;
        debug!(bucket = %key.location, object = %key.object, "downloading sealed document");

        let mut request = self
            .client
            .get_object()
            .bucket(&key.location)
            .key(&key.object);
        if let Some(generation) = &key.generation {
            request = request.version_id(generation);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, &format!("object {}", key)))?;

        let version_id = resp.version_id.clone();
        let body = resp.body.collect().await.map_err(|e| {
            ResolveError::transient(format!(
                "failed to read body of {}: {}",
                key,
                sanitize_error(&e.to_string())
            ))
        })?;
        let bytes = body.into_bytes();
        debug!(
            bucket = %key.location,
            object = %key.object,
            bytes = bytes.len(),
            "downloaded sealed document"
        );

        SealedDocument::from_slice(&bytes)?
            .into_object(&key.object, version_id.or_else(|| key.generation.clone()))
    }

    async fn list(
        &self,
        location: &str,
        prefix: &str,
    ) -> std::result::Result<Vec<String>, ResolveError> {
        validate_location(location)?;
        debug!(bucket = %location, prefix = %prefix, "listing objects");

        let mut names = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(location).prefix(prefix);
            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e, &format!("bucket {}", location)))?;

            names.extend(resp.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        names.sort();
        Ok(names)
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn classify_sdk_error<E>(err: &SdkError<E, HttpResponse>, what: &str) -> ResolveError
where
    E: std::error::Error + ProvideErrorMetadata + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    classify_status(status, err.code(), what, || {
        sanitize_error(&DisplayErrorContext(err).to_string())
    })
}

/// Map an HTTP status and S3 error code to a failure kind
fn classify_status(
    status: Option<u16>,
    code: Option<&str>,
    what: &str,
    detail: impl FnOnce() -> String,
) -> ResolveError {
    match (status, code) {
        (Some(404), _) | (_, Some("NoSuchKey" | "NoSuchBucket" | "NoSuchVersion")) => {
            ResolveError::not_found(format!("{} does not exist", what))
        }
        (Some(403), _)
        | (_, Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch")) => {
            ResolveError::access_denied(format!("access to {} denied", what))
        }
        (Some(400), _) => {
            ResolveError::malformed(format!("request for {} rejected: {}", what, detail()))
        }
        // Timeouts, dispatch failures, throttling and 5xx
        _ => ResolveError::transient(format!("failed to fetch {}: {}", what, detail())),
    }
}
