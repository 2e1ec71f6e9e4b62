//! S3-compatible vault backend.
//!
//! Works against AWS S3 and S3-compatible services (Backblaze B2, Tigris,
//! MinIO). Content and metadata may live under distinct buckets/prefixes so
//! each can carry its own lifecycle and storage-class policy.
//!
//! # Credentials
//!
//! Explicit `key_id`/`key_secret` from the configuration take precedence;
//! when absent, the SDK default provider chain applies (environment,
//! `~/.aws/credentials`, instance metadata). Explicit keys are the primary
//! path since Backblaze/Tigris-style targets don't fit the single-account
//! credential chain.
//!
//! # Atomicity & retries
//!
//! S3 PUTs are atomic by provider contract — an interrupted upload never
//! materializes a partial object. Transient failures are retried inside the
//! SDK with standard exponential backoff (1 initial + 3 retries) before
//! surfacing as `Unreachable`.

use crate::backend::{content_key, metadata_key, Vault};
use crate::digest::Digest;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region, retry::RetryConfig};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sha2::{Digest as _, Sha256};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

const DOWNLOAD_BUF_SIZE: usize = 8 * 1024 * 1024;

/// Everything needed to talk to one S3-style vault.
#[derive(Debug, Clone)]
pub struct S3Options {
    pub name: String,
    pub bucket: String,
    pub prefix: Option<String>,
    pub region: String,
    pub endpoint: Option<String>,
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    pub metadata_bucket: Option<String>,
    pub metadata_prefix: Option<String>,
}

/// Vault stored in an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct S3Vault {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    metadata_bucket: String,
    metadata_prefix: Option<String>,
}

/// Join an optional key prefix onto an object key.
fn join_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{key}", prefix.trim_end_matches('/')),
        None => key.to_string(),
    }
}

impl S3Vault {
    /// Create an S3 vault from resolved options.
    pub async fn new(options: S3Options) -> Result<Self> {
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(options.region))
            // Exponential backoff, 1 initial + 3 retries, then give up and
            // leave the op at the WAL head for the next run.
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for compatibility with non-AWS services.
            .force_path_style(true);
        builder = match (options.key_id, options.key_secret) {
            (Some(id), Some(secret)) => builder.credentials_provider(Credentials::new(id, secret, None, None, "bt-config")),
            _ => {
                let shared = aws_config::load_defaults(BehaviorVersion::latest()).await;
                match shared.credentials_provider() {
                    Some(provider) => builder.credentials_provider(provider),
                    None => builder,
                }
            },
        };
        if let Some(endpoint) = options.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Ok(Self {
            name: options.name,
            client: Client::from_conf(builder.build()),
            metadata_bucket: options.metadata_bucket.unwrap_or_else(|| options.bucket.clone()),
            metadata_prefix: options.metadata_prefix.or_else(|| options.prefix.clone()),
            bucket: options.bucket,
            prefix: options.prefix,
        })
    }

    fn content_location(&self, digest: &Digest) -> (String, String) {
        (self.bucket.clone(), join_key(self.prefix.as_deref(), &content_key(digest)))
    }

    fn metadata_location(&self, host_id: &Uuid) -> (String, String) {
        (self.metadata_bucket.clone(), join_key(self.metadata_prefix.as_deref(), &metadata_key(host_id)))
    }

    /// Translate an SDK error into the vault taxonomy. The SDK error's
    /// rendering is folded into the kind so the chain survives reporting.
    fn classify<E>(&self, err: SdkError<E>, key: &str) -> ErrorKind
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match &err {
            SdkError::ServiceError(ctx) => match ctx.raw().status().as_u16() {
                401 | 403 => ErrorKind::AuthDenied(format!("{}: {key}", self.name)),
                404 => ErrorKind::NotFound(key.to_string()),
                _ => ErrorKind::Unreachable(format!("{}: {err}", self.name)),
            },
            _ => ErrorKind::Unreachable(format!("{}: {err}", self.name)),
        }
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_not_found() => Ok(false),
            Err(e) => exn::bail!(self.classify(e, key)),
        }
    }

    async fn upload(&self, bucket: &str, key: &str, source: &Path) -> Result<()> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| ErrorKind::Io(std::io::Error::other(e)))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e, key))?;
        Ok(())
    }

    /// Stream an object to `output`, returning the digest of the bytes that
    /// went over the wire.
    async fn download(&self, bucket: &str, key: &str, output: &Path) -> Result<Digest> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if let SdkError::ServiceError(ctx) = &e
                    && ctx.err().is_no_such_key()
                {
                    return ErrorKind::NotFound(key.to_string());
                }
                self.classify(e, key)
            })?;
        let result: Result<Digest> = async {
            let mut body = resp.body.into_async_read();
            let mut file = tokio::fs::File::create(output).await.map_err(ErrorKind::Io)?;
            let mut hasher = Sha256::new();
            let mut buf = vec![0u8; DOWNLOAD_BUF_SIZE];
            loop {
                let read = body.read(&mut buf).await.map_err(ErrorKind::Io)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buf[..read]);
                file.write_all(&buf[..read]).await.map_err(ErrorKind::Io)?;
            }
            file.flush().await.map_err(ErrorKind::Io)?;
            Ok(Digest::from_hash(hasher.finalize().into()))
        }
        .await;
        if result.is_err() {
            _ = tokio::fs::remove_file(output).await;
        }
        result
    }
}

#[async_trait]
impl Vault for S3Vault {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_content(&self, digest: &Digest, source: &Path) -> Result<()> {
        let (bucket, key) = self.content_location(digest);
        // Cheap existence probe first: dedup across files, snapshots and
        // hosts means the object is very often already there.
        if self.object_exists(&bucket, &key).await? {
            tracing::debug!(vault = %self.name, %digest, "content already present; skipping upload");
            return Ok(());
        }
        let actual = Digest::of_file(source).await?;
        if actual != *digest {
            exn::bail!(ErrorKind::Corrupt {
                key,
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        tracing::debug!(vault = %self.name, %digest, "uploading content object");
        self.upload(&bucket, &key, source).await
    }

    async fn get_content(&self, digest: &Digest, output: &Path) -> Result<()> {
        let (bucket, key) = self.content_location(digest);
        let actual = self.download(&bucket, &key, output).await?;
        if actual != *digest {
            _ = tokio::fs::remove_file(output).await;
            exn::bail!(ErrorKind::Corrupt {
                key,
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    async fn put_metadata(&self, host_id: &Uuid, source: &Path) -> Result<()> {
        let (bucket, key) = self.metadata_location(host_id);
        tracing::debug!(vault = %self.name, %host_id, "uploading metadata database");
        self.upload(&bucket, &key, source).await
    }

    async fn get_metadata(&self, host_id: &Uuid, output: &Path) -> Result<()> {
        let (bucket, key) = self.metadata_location(host_id);
        self.download(&bucket, &key, output).await.map(|_| ())
    }

    async fn validate_setup(&self) -> Result<()> {
        // S3 has no directories to create; prove read/write/delete on every
        // (bucket, prefix) pair we'll touch instead.
        let probe_name = format!(".probe-{:08x}", rand::random::<u32>());
        let mut targets = vec![(self.bucket.clone(), join_key(self.prefix.as_deref(), &probe_name))];
        let metadata_target = (self.metadata_bucket.clone(), join_key(self.metadata_prefix.as_deref(), &probe_name));
        if !targets.contains(&metadata_target) {
            targets.push(metadata_target);
        }
        for (bucket, key) in targets {
            self.client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .body(ByteStream::from_static(b"bt-probe"))
                .send()
                .await
                .map_err(|e| self.classify(e, &key))?;
            self.client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| self.classify(e, &key))?;
            self.client
                .delete_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| self.classify(e, &key))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, "content/abc", "content/abc")]
    #[case(Some("bt"), "content/abc", "bt/content/abc")]
    #[case(Some("bt/"), "content/abc", "bt/content/abc")]
    #[case(Some("nested/prefix"), "metadata/h", "nested/prefix/metadata/h")]
    fn test_join_key(#[case] prefix: Option<&str>, #[case] key: &str, #[case] expected: &str) {
        assert_eq!(join_key(prefix, key), expected);
    }
}
