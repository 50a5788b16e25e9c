//! # Gateway エラー型
//!
//! アップロードハンドシェイクで発生した失敗は全て HTTP 500 と
//! `{"error": "..."}` に変換される。部分的な許可は発行しない。

use axum::http::StatusCode;
use axum::Json;
use relay_types::ErrorBody;

/// Gatewayエラー型。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 不正なリクエスト（ハンドシェイクのパース失敗等）
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),
    /// ストレージ操作に失敗
    #[error("ストレージ操作に失敗: {0}")]
    Storage(String),
    /// 完了通知の署名検証に失敗
    #[error("完了通知の署名検証に失敗: {0}")]
    Signature(String),
    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = %self, "アップロードハンドシェイクに失敗");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
