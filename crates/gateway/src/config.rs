//! # Gateway設定・共有状態
//!
//! 環境変数からの設定読み込みとGatewayの共有状態の定義。
//! 設定は起動時に一度だけ構築し、`GatewayState` 経由で各ハンドラに渡す。

use std::sync::Arc;
use std::time::Duration;

use crate::notifier::CompletionNotifier;
use crate::storage::BlobStorage;

/// デフォルトの待ち受けアドレス
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
/// バックエンド中継先のデフォルト
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
/// クライアントトークンの有効期間（秒）
pub const DEFAULT_UPLOAD_TOKEN_TTL_SECS: u64 = 3600;
/// 完了通知のバックエンド呼び出し上限（秒）
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 240;
/// バックエンド中継1回あたりの上限（秒）。プラットフォームのハンドラ上限に合わせる。
pub const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 300;
/// クライアントトークン有効期間の上限（秒）。S3署名付きURLの最長有効期間（7日）。
pub const MAX_UPLOAD_TOKEN_TTL_SECS: u64 = 604_800;

/// S3互換ストレージのデフォルト
pub const DEFAULT_S3_ENDPOINT: &str = "http://localhost:9000";
pub const DEFAULT_S3_CREDENTIAL: &str = "minioadmin";
pub const DEFAULT_S3_BUCKET: &str = "blob-relay-uploads";

/// オブジェクトストレージ設定。
pub struct StorageConfig {
    /// 内部通信用エンドポイント（`S3_ENDPOINT`）
    pub endpoint: String,
    /// ブラウザ向けエンドポイント（`S3_PUBLIC_ENDPOINT`）
    pub public_endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// 明示指定のリージョン（`S3_REGION`）
    pub region: Option<String>,
}

impl StorageConfig {
    /// エンドポイントに対応するリージョン名を返す。
    ///
    /// 明示指定が無い場合、AWSエンドポイント（s3.REGION.amazonaws.com）ならリージョンを取り出す。
    /// それ以外はus-east-1。
    pub fn region_for(&self, endpoint: &str) -> String {
        if let Some(region) = &self.region {
            return region.clone();
        }
        endpoint
            .find("s3.")
            .and_then(|start| {
                let rest = &endpoint[start + 3..];
                rest.find(".amazonaws.com").map(|end| rest[..end].to_string())
            })
            .unwrap_or_else(|| "us-east-1".to_string())
    }
}

/// Gateway設定。
pub struct GatewayConfig {
    /// 待ち受けアドレス
    pub listen_addr: String,
    /// `/backend/*` の中継先ベースURL（`BACKEND_URL`）
    pub backend_url: String,
    /// デプロイメントのホスト名（`VERCEL_URL`、スキーム無し）
    pub deployment_host: Option<String>,
    /// デプロイメント保護のバイパス用シークレット
    pub protection_bypass_secret: Option<String>,
    /// クライアントトークンと完了通知署名のHMAC鍵
    pub callback_secret: Vec<u8>,
    /// クライアントトークンの有効期間
    pub upload_token_ttl: Duration,
    /// 完了通知のバックエンド呼び出し上限
    pub notify_timeout: Duration,
    /// バックエンド中継の上限
    pub proxy_timeout: Duration,
    /// オブジェクトストレージ設定
    pub storage: StorageConfig,
}

impl GatewayConfig {
    /// 環境変数から構築する。
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の参照関数から構築する。
    /// 空文字列の値は未設定として扱う。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let callback_secret = match get("BLOB_CALLBACK_SECRET") {
            Some(secret) => secret.into_bytes(),
            None => {
                // 開発環境用: プロセスごとのランダム鍵
                tracing::warn!(
                    "BLOB_CALLBACK_SECRETが未設定です。ランダム鍵を生成します（開発環境用）"
                );
                rand::random::<[u8; 32]>().to_vec()
            }
        };

        let upload_token_ttl = parse_secs(
            get("UPLOAD_TOKEN_TTL_SECS"),
            "UPLOAD_TOKEN_TTL_SECS",
            DEFAULT_UPLOAD_TOKEN_TTL_SECS,
        )?;
        if upload_token_ttl.as_secs() > MAX_UPLOAD_TOKEN_TTL_SECS {
            anyhow::bail!(
                "UPLOAD_TOKEN_TTL_SECSは{MAX_UPLOAD_TOKEN_TTL_SECS}以下である必要があります"
            );
        }

        let storage = StorageConfig {
            endpoint: get("S3_ENDPOINT").unwrap_or_else(|| DEFAULT_S3_ENDPOINT.to_string()),
            public_endpoint: get("S3_PUBLIC_ENDPOINT"),
            access_key: get("S3_ACCESS_KEY").unwrap_or_else(|| DEFAULT_S3_CREDENTIAL.to_string()),
            secret_key: get("S3_SECRET_KEY").unwrap_or_else(|| DEFAULT_S3_CREDENTIAL.to_string()),
            bucket: get("S3_BUCKET").unwrap_or_else(|| DEFAULT_S3_BUCKET.to_string()),
            region: get("S3_REGION"),
        };

        Ok(Self {
            listen_addr: get("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            backend_url: get("BACKEND_URL")
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            deployment_host: get("VERCEL_URL"),
            protection_bypass_secret: get("VERCEL_AUTOMATION_BYPASS_SECRET"),
            callback_secret,
            upload_token_ttl,
            notify_timeout: parse_secs(
                get("NOTIFY_TIMEOUT_SECS"),
                "NOTIFY_TIMEOUT_SECS",
                DEFAULT_NOTIFY_TIMEOUT_SECS,
            )?,
            proxy_timeout: parse_secs(
                get("PROXY_TIMEOUT_SECS"),
                "PROXY_TIMEOUT_SECS",
                DEFAULT_PROXY_TIMEOUT_SECS,
            )?,
            storage,
        })
    }
}

fn parse_secs(value: Option<String>, key: &str, default: u64) -> anyhow::Result<Duration> {
    let secs = match value {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map_err(|e| anyhow::anyhow!("{key}は秒数（正の整数）である必要があります: {e}"))?,
        None => default,
    };
    if secs == 0 {
        anyhow::bail!("{key}は1以上である必要があります");
    }
    Ok(Duration::from_secs(secs))
}

/// Gatewayの共有状態。
pub struct GatewayState {
    /// 起動時に構築した設定
    pub config: Arc<GatewayConfig>,
    /// HTTPクライアント
    pub http_client: reqwest::Client,
    /// オブジェクトストレージ（S3互換等、トレイトで抽象化）
    pub storage: Arc<dyn BlobStorage>,
    /// アップロード完了通知ワーカーへの投入口
    pub notifier: CompletionNotifier,
}
