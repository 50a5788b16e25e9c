//! # バックエンドオリジンの解決
//!
//! 完了通知の送信先オリジンを決める。優先順位:
//! 1. ハンドシェイクを受けたリクエストの `Host` / `X-Forwarded-Proto`
//! 2. デプロイメントのホスト名（`VERCEL_URL`、スキームはhttps固定）
//! 3. ローカル開発用のフォールバック

use axum::http::HeaderMap;

/// いずれの手掛かりも無い場合のオリジン
pub const LOCAL_FALLBACK_ORIGIN: &str = "http://localhost:3000";

/// リクエストヘッダからオリジン（`scheme://host`）を取り出す。
/// `X-Forwarded-Proto` が無い場合はhttpsとみなす。
pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        // プロキシ多段時は "https,http" のように連結される
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("https");
    Some(format!("{scheme}://{host}"))
}

/// 完了通知の送信先オリジンを解決する。
pub fn resolve_backend_origin(request_origin: Option<&str>, deployment_host: Option<&str>) -> String {
    if let Some(origin) = request_origin {
        return origin.trim_end_matches('/').to_string();
    }
    if let Some(host) = deployment_host {
        return format!("https://{}", host.trim_end_matches('/'));
    }
    LOCAL_FALLBACK_ORIGIN.to_string()
}
