//! S3 object source
//!
//! Streams objects out of AWS S3 or an S3-compatible service. Listings page
//! through `ListObjectsV2` lazily, one request per page.

use super::error::{SourceError, SourceResult};
use super::{ObjectDescriptor, ObjectSource, ObjectStream, SourceObject};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client as AwsS3Client;
use futures::stream::{self, StreamExt};

use crate::config::MigrationConfig;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// S3 source adapter
///
/// # Example
///
/// ```no_run
/// use dstore_migrate::config::MigrationConfig;
/// use dstore_migrate::source::{ObjectSource, S3Source};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut config = MigrationConfig::new("allocation-id");
///     config.region = Some("us-east-1".to_string());
///
///     let source = S3Source::new(&config).await;
///     for bucket in source.list_containers().await? {
///         println!("{}", bucket);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct S3Source {
    client: AwsS3Client,
}

impl S3Source {
    /// Build a region-aware client from the migration configuration
    ///
    /// Credentials come from the default AWS provider chain.
    pub async fn new(config: &MigrationConfig) -> Self {
        let region_provider = match &config.region {
            Some(region) => RegionProviderChain::first_try(Region::new(region.clone())),
            None => RegionProviderChain::default_provider(),
        };

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: AwsS3Client::from_conf(builder.build()),
        }
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: AwsS3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectSource for S3Source {
    async fn list_containers(&self) -> SourceResult<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| SourceError::service("ListBuckets", DisplayErrorContext(&e)))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect())
    }

    fn list_objects(&self, container: &str, prefix: Option<&str>) -> ObjectStream {
        let client = self.client.clone();
        let bucket = container.to_string();
        let prefix = prefix.map(str::to_string);

        // State: Some(token) while pages remain; the inner None is the first page
        stream::unfold(Some(None::<String>), move |token_state| {
            let client = client.clone();
            let bucket = bucket.clone();
            let prefix = prefix.clone();

            async move {
                let token = token_state?;

                let mut request = client.list_objects_v2().bucket(&bucket);
                if let Some(ref p) = prefix {
                    request = request.prefix(p);
                }
                if let Some(ref t) = token {
                    request = request.continuation_token(t);
                }

                let response = match request.send().await {
                    Ok(r) => r,
                    Err(e) => {
                        let err = SourceError::service(
                            format!("ListObjectsV2 on '{}'", bucket),
                            DisplayErrorContext(&e),
                        );
                        return Some((stream::once(async move { Err(err) }).boxed(), None));
                    }
                };

                let page: Vec<SourceResult<ObjectDescriptor>> = response
                    .contents()
                    .iter()
                    .filter_map(|object| {
                        object.key().map(|key| {
                            Ok(ObjectDescriptor {
                                container: bucket.clone(),
                                key: key.to_string(),
                                size: object.size().unwrap_or(0).max(0) as u64,
                                content_type: None,
                            })
                        })
                    })
                    .collect();

                let next = if response.is_truncated().unwrap_or(false) {
                    response
                        .next_continuation_token()
                        .map(|t| Some(t.to_string()))
                } else {
                    None
                };

                Some((stream::iter(page).boxed(), next))
            }
        })
        .flatten()
        .boxed()
    }

    async fn open_object(&self, container: &str, key: &str) -> SourceResult<SourceObject> {
        let output = self
            .client
            .get_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(service) if service.is_no_such_key() => SourceError::NotFound {
                    container: container.to_string(),
                    key: key.to_string(),
                },
                _ => SourceError::service("GetObject", DisplayErrorContext(&e)),
            })?;

        let size = output.content_length().unwrap_or(0).max(0) as u64;
        let content_type = output
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        Ok(SourceObject {
            reader: Box::new(output.body.into_async_read()),
            size,
            content_type,
        })
    }

    async fn delete_object(&self, container: &str, key: &str) -> SourceResult<()> {
        self.client
            .delete_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| SourceError::service("DeleteObject", DisplayErrorContext(&e)))?;
        Ok(())
    }

    fn source_name(&self) -> &str {
        "s3"
    }
}
