//! # S3互換 オブジェクトストレージ実装
//!
//! AWS S3, MinIO, Cloudflare R2 等のS3互換APIを使用する実装。

use http::{header, HeaderMap, HeaderValue};

use super::BlobStorage;
use crate::config::StorageConfig;
use crate::error::GatewayError;

/// S3互換ストレージによる一時オブジェクトストレージ実装。
pub struct S3BlobStorage {
    /// 内部通信用バケット（削除等）
    bucket_internal: s3::Bucket,
    /// クライアント向けバケット（署名付きURL生成用）。
    /// 内部ホスト名と外部ホスト名が異なる場合に使用。
    /// Noneの場合はbucket_internalを使用する。
    bucket_public: Option<s3::Bucket>,
}

impl S3BlobStorage {
    pub fn new(bucket_internal: s3::Bucket, bucket_public: Option<s3::Bucket>) -> Self {
        Self {
            bucket_internal,
            bucket_public,
        }
    }

    fn init_bucket(config: &StorageConfig, endpoint: &str) -> anyhow::Result<s3::Bucket> {
        let region = s3::Region::Custom {
            region: config.region_for(endpoint),
            endpoint: endpoint.to_string(),
        };

        let credentials = s3::creds::Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )?;

        let bucket = s3::Bucket::new(&config.bucket, region, credentials)?.with_path_style();

        Ok(*bucket)
    }

    /// 起動時に読み込んだストレージ設定から構築する。
    pub fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        tracing::info!(
            s3_endpoint = %config.endpoint,
            s3_bucket = %config.bucket,
            "S3ストレージを設定"
        );

        let bucket_internal = Self::init_bucket(config, &config.endpoint)?;

        let bucket_public = config
            .public_endpoint
            .as_deref()
            .map(|public_ep| {
                tracing::info!(
                    s3_public_endpoint = %public_ep,
                    "クライアント向けS3エンドポイントを設定"
                );
                Self::init_bucket(config, public_ep)
            })
            .transpose()?;

        Ok(Self::new(bucket_internal, bucket_public))
    }
}

#[async_trait::async_trait]
impl BlobStorage for S3BlobStorage {
    async fn presign_upload(
        &self,
        object_key: &str,
        content_type: &str,
        expiry_secs: u32,
    ) -> Result<String, GatewayError> {
        let public_bucket = self.bucket_public.as_ref().unwrap_or(&self.bucket_internal);

        // Content-Typeを署名対象ヘッダに含める
        let mut signed_headers = HeaderMap::new();
        let value = HeaderValue::from_str(content_type)
            .map_err(|e| GatewayError::BadRequest(format!("不正なcontentType: {e}")))?;
        signed_headers.insert(header::CONTENT_TYPE, value);

        public_bucket
            .presign_put(object_key, expiry_secs, Some(signed_headers), None)
            .await
            .map_err(|e| GatewayError::Storage(format!("署名付きアップロードURL生成失敗: {e}")))
    }

    async fn delete_object(&self, object_key: &str) -> Result<(), GatewayError> {
        let response = self
            .bucket_internal
            .delete_object(object_key)
            .await
            .map_err(|e| GatewayError::Storage(format!("オブジェクト削除失敗 ({object_key}): {e}")))?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(GatewayError::Storage(format!(
                "オブジェクト削除でHTTPエラー: ステータス {status} ({object_key})"
            )));
        }
        Ok(())
    }
}
