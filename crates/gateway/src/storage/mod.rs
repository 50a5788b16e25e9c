//! # オブジェクトストレージ
//!
//! ブラウザからの直接アップロード先となる一時オブジェクトストレージの
//! 抽象インターフェース。S3互換ストレージ実装は `s3` サブモジュールを参照。

#[cfg(feature = "vendor-aws")]
pub mod s3;

#[cfg(feature = "vendor-aws")]
pub use self::s3::S3BlobStorage;

use crate::error::GatewayError;

/// 一時オブジェクトストレージの抽象インターフェース。
///
/// Gateway運用者はS3互換ストレージ（MinIO, AWS S3, Cloudflare R2等）や
/// その他のストレージバックエンドを実装として選択できる。
/// Gateway自身はオブジェクトの中身を読み書きしない。
#[async_trait::async_trait]
pub trait BlobStorage: Send + Sync {
    /// クライアントが直接アップロードするための署名付きURL（PUT）を生成する。
    ///
    /// `content_type` は署名に含め、異なるContent-TypeのPUTはストレージ側で拒否させる。
    async fn presign_upload(
        &self,
        object_key: &str,
        content_type: &str,
        expiry_secs: u32,
    ) -> Result<String, GatewayError>;

    /// バックエンドへの引き渡しが終わった一時オブジェクトを削除する。
    async fn delete_object(&self, object_key: &str) -> Result<(), GatewayError>;
}
