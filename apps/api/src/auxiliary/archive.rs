//! Archive of generated content in object storage (S3 / MinIO).

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::info;

use crate::models::content::GeneratedContent;

#[async_trait]
pub trait ContentArchive: Send + Sync {
    /// Stores `content` and returns the object key.
    async fn archive(&self, content: &GeneratedContent) -> anyhow::Result<String>;
}

pub fn archive_key(content: &GeneratedContent) -> String {
    format!(
        "generated/{}/{}/{}.json",
        content.learner_id, content.course_id, content.id
    )
}

pub struct S3ContentArchive {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ContentArchive {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl ContentArchive for S3ContentArchive {
    async fn archive(&self, content: &GeneratedContent) -> anyhow::Result<String> {
        let key = archive_key(content);
        let body = serde_json::to_vec_pretty(content)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("S3 upload failed: {e}"))?;

        info!("Archived content {} to s3://{}/{}", content.id, self.bucket, key);
        Ok(key)
    }
}
