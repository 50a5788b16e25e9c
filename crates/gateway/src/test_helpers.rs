//! # テスト用共通ヘルパー
//!
//! notifier, endpointsのテストで共有するモックストレージとモックバックエンド。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use relay_types::UploadFromUrlRequest;
use tokio::sync::mpsc;

use crate::config::{GatewayConfig, GatewayState};
use crate::error::GatewayError;
use crate::notifier::{CompletionNotifier, CompletionReport, NotifierContext};
use crate::storage::BlobStorage;

pub const TEST_SECRET: &str = "test-callback-secret";

/// S3への接続なしで署名付きURLのダミーを返し、削除要求を記録するストレージ。
#[derive(Default)]
pub struct MockStorage {
    pub deleted: Mutex<Vec<String>>,
    pub fail_presign: bool,
    pub fail_delete: bool,
}

impl MockStorage {
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl BlobStorage for MockStorage {
    async fn presign_upload(
        &self,
        object_key: &str,
        content_type: &str,
        expiry_secs: u32,
    ) -> Result<String, GatewayError> {
        if self.fail_presign {
            return Err(GatewayError::Storage("presign unavailable".to_string()));
        }
        Ok(format!(
            "http://mock-storage/{object_key}?X-Amz-Expires={expiry_secs}&content-type={content_type}&sig=test"
        ))
    }

    async fn delete_object(&self, object_key: &str) -> Result<(), GatewayError> {
        if self.fail_delete {
            return Err(GatewayError::Storage("delete unavailable".to_string()));
        }
        self.deleted.lock().unwrap().push(object_key.to_string());
        Ok(())
    }
}

/// 環境変数に依存しないテスト用設定。
pub fn test_config() -> GatewayConfig {
    GatewayConfig::from_lookup(|key: &str| match key {
        "BLOB_CALLBACK_SECRET" => Some(TEST_SECRET.to_string()),
        _ => None,
    })
    .unwrap()
}

/// テスト用GatewayStateを構築する。完了通知ワーカーのレポート受信側も返す。
pub fn test_state(
    config: GatewayConfig,
    storage: Arc<MockStorage>,
) -> (Arc<GatewayState>, mpsc::UnboundedReceiver<CompletionReport>) {
    let config = Arc::new(config);
    let http_client = reqwest::Client::new();
    let (reports_tx, reports_rx) = mpsc::unbounded_channel();
    let notifier = CompletionNotifier::spawn_with_reports(
        Arc::new(NotifierContext {
            config: config.clone(),
            http_client: http_client.clone(),
            storage: storage.clone(),
        }),
        Some(reports_tx),
    );
    let state = Arc::new(GatewayState {
        config,
        http_client,
        storage,
        notifier,
    });
    (state, reports_rx)
}

/// ルーターを127.0.0.1の空きポートで起動し、ポート番号を返す。
pub async fn serve(app: axum::Router) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// モックバックエンドが受信した `/backend/upload-from-url` 呼び出し。
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub body: UploadFromUrlRequest,
    pub bypass: Option<String>,
}

pub struct RecordingBackend {
    pub port: u16,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl RecordingBackend {
    pub fn origin(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

/// `/backend/upload-from-url` を記録し、指定ステータスで応答するモックバックエンドを起動する。
/// `delay` だけ応答を遅らせる。
pub async fn start_recording_backend(status: StatusCode, delay: Duration) -> RecordingBackend {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();

    let app = axum::Router::new().route(
        "/backend/upload-from-url",
        axum::routing::post(
            move |headers: HeaderMap, Json(body): Json<UploadFromUrlRequest>| {
                let recorded = recorded.clone();
                async move {
                    let bypass = headers
                        .get("x-vercel-protection-bypass")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    recorded.lock().unwrap().push(RecordedCall { body, bypass });
                    tokio::time::sleep(delay).await;
                    (status, Json(serde_json::json!({"status": "processed"})))
                }
            },
        ),
    );

    let port = serve(app).await;
    RecordingBackend { port, calls }
}
