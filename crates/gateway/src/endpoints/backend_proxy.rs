//! # /backend/* 中継
//!
//! `GET` / `POST` / `DELETE` を `{BACKEND_URL}/backend/{path}` にそのまま転送し、
//! バックエンドのJSONとステータスコードをそのまま返す。状態は持たない。
//!
//! - GET: クエリ文字列とContent-Typeのみ転送
//! - POST: 生ボディ（バイナリ可）とContent-Typeを転送
//! - DELETE: ボディ無し
//!
//! 通信失敗・タイムアウト・JSONでないボディは500と `{"error": "Proxy error", "detail": ...}` に変換する。

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_types::ProxyErrorBody;

use crate::config::GatewayState;

/// Content-Typeが無い場合に付与する値
const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// 中継失敗。常に500として返す。
#[derive(Debug)]
pub struct ProxyError {
    /// 原因となったエラーのメッセージ
    pub detail: String,
    /// 中継しようとしたパス（POSTのみ）
    pub path: Option<String>,
}

impl ProxyError {
    fn new(err: reqwest::Error) -> Self {
        Self {
            detail: err.to_string(),
            path: None,
        }
    }

    fn with_path(mut self, path: String) -> Self {
        self.path = Some(path);
        self
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        tracing::error!(detail = %self.detail, path = ?self.path, "バックエンド中継に失敗");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ProxyErrorBody {
                error: "Proxy error".to_string(),
                detail: self.detail,
                path: self.path,
            }),
        )
            .into_response()
    }
}

/// 中継先URLを組み立てる。
fn backend_url(base: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{base}/backend/{path}?{q}"),
        _ => format!("{base}/backend/{path}"),
    }
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// バックエンドのレスポンスをJSONとして読み、ステータスごと返す。
async fn relay_json(response: reqwest::Response) -> Result<Response, reqwest::Error> {
    let status = response.status();
    let data: serde_json::Value = response.json().await?;
    Ok((status, Json(data)).into_response())
}

/// GET /backend/{*path}
pub async fn handle_backend_get(
    State(state): State<Arc<GatewayState>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    let url = backend_url(&state.config.backend_url, &path, query.as_deref());

    let response = state
        .http_client
        .get(&url)
        .header(header::CONTENT_TYPE, content_type(&headers))
        .timeout(state.config.proxy_timeout)
        .send()
        .await
        .map_err(ProxyError::new)?;

    relay_json(response).await.map_err(ProxyError::new)
}

/// POST /backend/{*path}
pub async fn handle_backend_post(
    State(state): State<Arc<GatewayState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let url = backend_url(&state.config.backend_url, &path, None);
    let attempted = format!("/backend/{path}");

    tracing::info!(path = %attempted, bytes = body.len(), "POSTを中継します");

    let response = state
        .http_client
        .post(&url)
        .header(header::CONTENT_TYPE, content_type(&headers))
        .body(body)
        .timeout(state.config.proxy_timeout)
        .send()
        .await
        .map_err(|e| ProxyError::new(e).with_path(attempted.clone()))?;

    tracing::info!(path = %attempted, status = %response.status(), "バックエンドのレスポンスを受信");

    relay_json(response)
        .await
        .map_err(|e| ProxyError::new(e).with_path(attempted))
}

/// DELETE /backend/{*path}
pub async fn handle_backend_delete(
    State(state): State<Arc<GatewayState>>,
    Path(path): Path<String>,
) -> Result<Response, ProxyError> {
    let url = backend_url(&state.config.backend_url, &path, None);

    let response = state
        .http_client
        .delete(&url)
        .timeout(state.config.proxy_timeout)
        .send()
        .await
        .map_err(ProxyError::new)?;

    relay_json(response).await.map_err(ProxyError::new)
}
