//! # POST /api/upload-blob
//!
//! ブラウザからストレージへの直接アップロードのハンドシェイク。
//! プラットフォームのリクエストサイズ上限を回避するため、ファイル本体はGatewayを通らない。
//!
//! 同じエンドポイントに2種類のボディが届く:
//! - `blob.generate-client-token`: ブラウザからのトークン発行要求
//! - `blob.upload-completed`: ストレージプロバイダからの完了通知（署名付き）

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use relay_types::{
    ClientTokenResponse, GenerateClientTokenPayload, HandleUploadBody, HandleUploadResponse,
    UploadCompletedPayload, UploadCompletedResponse,
};

use crate::config::GatewayState;
use crate::error::GatewayError;
use crate::grant::{check_content_type, issue_grant};
use crate::notifier::CompletionJob;
use crate::origin::request_origin;

/// ハンドシェイクのパス
pub const UPLOAD_BLOB_PATH: &str = "/api/upload-blob";

/// 完了通知ボディのHMAC署名ヘッダ
pub const SIGNATURE_HEADER: &str = "x-blob-signature";

/// POST /api/upload-blob — アップロードハンドシェイク。
///
/// 失敗は全て HTTP 500 と `{"error": "..."}` になる。
pub async fn handle_upload_blob(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HandleUploadResponse>, GatewayError> {
    let origin = request_origin(&headers);

    let upload_body: HandleUploadBody = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::BadRequest(format!("ハンドシェイクのパースに失敗: {e}")))?;

    let response = match upload_body {
        HandleUploadBody::GenerateClientToken(payload) => HandleUploadResponse::GenerateClientToken(
            generate_client_token(&state, payload, origin.as_deref()).await?,
        ),
        HandleUploadBody::UploadCompleted(payload) => {
            verify_callback_signature(&state, &headers, &body)?;
            accept_upload_completed(&state, payload, origin)?;
            HandleUploadResponse::UploadCompleted(UploadCompletedResponse::ok())
        }
    };

    Ok(Json(response))
}

async fn generate_client_token(
    state: &GatewayState,
    payload: GenerateClientTokenPayload,
    origin: Option<&str>,
) -> Result<ClientTokenResponse, GatewayError> {
    if payload.pathname.trim().is_empty() {
        return Err(GatewayError::BadRequest("pathnameが空です".to_string()));
    }
    let content_type = check_content_type(payload.content_type.as_deref())?;

    let callback_url = payload
        .callback_url
        .clone()
        .or_else(|| origin.map(|o| format!("{o}{UPLOAD_BLOB_PATH}")));
    if callback_url.is_none() {
        tracing::warn!(
            pathname = %payload.pathname,
            "完了通知の送信先が不明なため、完了通知を登録しません"
        );
    }

    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| GatewayError::Internal(format!("時刻取得失敗: {e}")))?
        .as_millis() as u64;

    let ttl = state.config.upload_token_ttl;
    let issued = issue_grant(
        &state.config.callback_secret,
        &payload.pathname,
        payload.client_payload.as_deref(),
        callback_url,
        ttl,
        now_ms,
    )?;

    let expiry_secs = u32::try_from(ttl.as_secs()).unwrap_or(u32::MAX);
    let upload_url = state
        .storage
        .presign_upload(&issued.grant.pathname, content_type, expiry_secs)
        .await?;

    tracing::info!(
        pathname = %issued.grant.pathname,
        content_type = %content_type,
        valid_until = issued.grant.valid_until,
        "クライアントトークンを発行しました"
    );

    Ok(ClientTokenResponse {
        client_token: issued.client_token,
        upload_url,
        pathname: issued.grant.pathname,
        valid_until: issued.grant.valid_until,
    })
}

fn verify_callback_signature(
    state: &GatewayState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), GatewayError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::Signature(format!("{SIGNATURE_HEADER}ヘッダがありません")))?;
    relay_crypto::verify_body_signature(&state.config.callback_secret, body, signature)
        .map_err(|e| GatewayError::Signature(e.to_string()))
}

/// 完了通知をワーカーに渡し、即座に受領を返す。
fn accept_upload_completed(
    state: &GatewayState,
    payload: UploadCompletedPayload,
    origin: Option<String>,
) -> Result<(), GatewayError> {
    tracing::info!(blob_url = %payload.blob.url, "アップロード完了通知を受信");
    state.notifier.dispatch(CompletionJob {
        blob: payload.blob,
        token_payload: payload.token_payload,
        request_origin: origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use relay_types::{TokenPayload, ALLOWED_CONTENT_TYPES};

    use crate::grant::open_client_token;
    use crate::notifier::CompletionOutcome;
    use crate::test_helpers::{
        start_recording_backend, test_config, test_state, MockStorage, TEST_SECRET,
    };

    fn headers_for(origin_host: &str, proto: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(origin_host).unwrap());
        headers.insert("x-forwarded-proto", HeaderValue::from_str(proto).unwrap());
        headers
    }

    fn token_request(client_payload: Option<&str>) -> Bytes {
        let mut payload = serde_json::json!({
            "pathname": "docs/a.pdf",
            "contentType": "application/pdf",
            "multipart": false
        });
        if let Some(cp) = client_payload {
            payload["clientPayload"] = serde_json::Value::String(cp.to_string());
        }
        Bytes::from(
            serde_json::to_vec(&serde_json::json!({
                "type": "blob.generate-client-token",
                "payload": payload,
            }))
            .unwrap(),
        )
    }

    async fn error_body(err: GatewayError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    /// トークン発行: 許可MIMEタイプ・ランダムサフィックス・不透明ペイロードを確認
    #[tokio::test]
    async fn test_generate_client_token() {
        let storage = Arc::new(MockStorage::default());
        let (state, _reports) = test_state(test_config(), storage);

        let result = handle_upload_blob(
            State(state),
            headers_for("app.example.com", "https"),
            token_request(Some(r#"{"originalFilename":"Quarterly Report.pdf"}"#)),
        )
        .await;

        let response = match result.unwrap().0 {
            HandleUploadResponse::GenerateClientToken(r) => r,
            other => panic!("unexpected response: {other:?}"),
        };
        assert!(response.pathname.starts_with("docs/a-"));
        assert!(response.upload_url.starts_with("http://mock-storage/docs/a-"));
        assert!(response.upload_url.contains("content-type=application/pdf"));

        let grant = open_client_token(TEST_SECRET.as_bytes(), &response.client_token);
        assert_eq!(grant.pathname, response.pathname);
        assert_eq!(grant.valid_until, response.valid_until);
        assert!(grant.add_random_suffix);
        assert_eq!(grant.allowed_content_types, ALLOWED_CONTENT_TYPES.to_vec());

        let callback = grant.on_upload_completed.unwrap();
        assert_eq!(callback.callback_url, "https://app.example.com/api/upload-blob");
        let token_payload: TokenPayload = serde_json::from_str(&callback.token_payload).unwrap();
        assert_eq!(token_payload.pathname.as_deref(), Some("docs/a.pdf"));
        assert_eq!(
            token_payload.original_filename.as_deref(),
            Some("Quarterly Report.pdf")
        );
    }

    /// パース不能なclientPayloadは空扱いになり、ファイル名はパス名で代用される
    #[tokio::test]
    async fn test_generate_client_token_with_unparsable_payload() {
        let (state, _reports) = test_state(test_config(), Arc::new(MockStorage::default()));

        let result = handle_upload_blob(
            State(state),
            HeaderMap::new(),
            token_request(Some("not-json")),
        )
        .await;

        let response = match result.unwrap().0 {
            HandleUploadResponse::GenerateClientToken(r) => r,
            other => panic!("unexpected response: {other:?}"),
        };
        let grant = open_client_token(TEST_SECRET.as_bytes(), &response.client_token);
        // HostヘッダもcallbackUrlも無いので完了通知は登録されない
        assert!(grant.on_upload_completed.is_none());
    }

    #[tokio::test]
    async fn test_client_callback_url_wins() {
        let (state, _reports) = test_state(test_config(), Arc::new(MockStorage::default()));
        let body = Bytes::from(
            serde_json::to_vec(&serde_json::json!({
                "type": "blob.generate-client-token",
                "payload": {
                    "pathname": "a.txt",
                    "contentType": "text/plain",
                    "callbackUrl": "https://hooks.example.com/api/upload-blob",
                    "clientPayload": "{}"
                }
            }))
            .unwrap(),
        );

        let response = match handle_upload_blob(State(state), headers_for("app", "https"), body)
            .await
            .unwrap()
            .0
        {
            HandleUploadResponse::GenerateClientToken(r) => r,
            other => panic!("unexpected response: {other:?}"),
        };
        let grant = open_client_token(TEST_SECRET.as_bytes(), &response.client_token);
        let callback = grant.on_upload_completed.unwrap();
        assert_eq!(callback.callback_url, "https://hooks.example.com/api/upload-blob");
        let token_payload: TokenPayload = serde_json::from_str(&callback.token_payload).unwrap();
        assert_eq!(token_payload.original_filename.as_deref(), Some("a.txt"));
    }

    /// ストレージ障害時は500 + {error}で、部分的な許可は返らない
    #[tokio::test]
    async fn test_presign_failure_is_500() {
        let storage = Arc::new(MockStorage {
            fail_presign: true,
            ..MockStorage::default()
        });
        let (state, _reports) = test_state(test_config(), storage);

        let err = handle_upload_blob(State(state), HeaderMap::new(), token_request(None))
            .await
            .unwrap_err();

        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("presign unavailable"));
        assert!(body.get("clientToken").is_none());
    }

    /// 許可リスト外のMIMEタイプは500 + {error}で、アップロードURLは発行されない
    #[tokio::test]
    async fn test_disallowed_content_type_is_500() {
        let (state, _reports) = test_state(test_config(), Arc::new(MockStorage::default()));

        for content_type in [Some("application/x-msdownload"), Some("text/html"), None] {
            let mut payload = serde_json::json!({ "pathname": "docs/a.pdf" });
            if let Some(ct) = content_type {
                payload["contentType"] = serde_json::Value::String(ct.to_string());
            }
            let body = Bytes::from(
                serde_json::to_vec(&serde_json::json!({
                    "type": "blob.generate-client-token",
                    "payload": payload,
                }))
                .unwrap(),
            );

            let err = handle_upload_blob(State(state.clone()), HeaderMap::new(), body)
                .await
                .unwrap_err();

            let (status, body) = error_body(err).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert!(body["error"].is_string());
            assert!(body.get("uploadUrl").is_none());
        }
    }

    #[tokio::test]
    async fn test_invalid_body_is_500() {
        let (state, _reports) = test_state(test_config(), Arc::new(MockStorage::default()));

        let err = handle_upload_blob(State(state), HeaderMap::new(), Bytes::from_static(b"{"))
            .await
            .unwrap_err();

        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_empty_pathname_is_rejected() {
        let (state, _reports) = test_state(test_config(), Arc::new(MockStorage::default()));
        let body = Bytes::from_static(
            br#"{"type":"blob.generate-client-token","payload":{"pathname":"  "}}"#,
        );

        let result = handle_upload_blob(State(state), HeaderMap::new(), body).await;
        assert!(matches!(result, Err(GatewayError::BadRequest(_))));
    }

    fn completion_body(token_payload: Option<&str>) -> Bytes {
        let mut payload = serde_json::json!({
            "blob": {
                "url": "https://store.example.com/docs/a-xyz.pdf",
                "pathname": "docs/a-xyz.pdf",
                "contentType": "application/pdf"
            }
        });
        if let Some(tp) = token_payload {
            payload["tokenPayload"] = serde_json::Value::String(tp.to_string());
        }
        Bytes::from(
            serde_json::to_vec(&serde_json::json!({
                "type": "blob.upload-completed",
                "payload": payload,
            }))
            .unwrap(),
        )
    }

    fn sign(headers: &mut HeaderMap, body: &[u8]) {
        let signature = relay_crypto::sign_body(TEST_SECRET.as_bytes(), body).unwrap();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&signature).unwrap());
    }

    /// 完了通知: 即座にokを返し、バックグラウンドでバックエンド通知と削除が行われる
    #[tokio::test]
    async fn test_upload_completed_notifies_backend() {
        let backend = start_recording_backend(StatusCode::OK, Duration::ZERO).await;
        let storage = Arc::new(MockStorage::default());
        let (state, mut reports) = test_state(test_config(), storage.clone());

        let body = completion_body(Some(r#"{"pathname":"docs/a.pdf","originalFilename":"a.pdf"}"#));
        let mut headers = headers_for(&format!("127.0.0.1:{}", backend.port), "http");
        sign(&mut headers, &body);

        let response = handle_upload_blob(State(state), headers, body).await.unwrap().0;
        assert!(matches!(
            response,
            HandleUploadResponse::UploadCompleted(ref r) if r.response == "ok"
        ));

        let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.result.unwrap(), CompletionOutcome::Cleaned);

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].body.filename, "a.pdf");
        assert_eq!(storage.deleted(), vec!["docs/a-xyz.pdf".to_string()]);
    }

    /// 署名が無い・一致しない完了通知は500になり、通知は行われない
    #[tokio::test]
    async fn test_upload_completed_requires_signature() {
        let backend = start_recording_backend(StatusCode::OK, Duration::ZERO).await;
        let (state, _reports) = test_state(test_config(), Arc::new(MockStorage::default()));

        let body = completion_body(None);
        let headers = headers_for(&format!("127.0.0.1:{}", backend.port), "http");
        let result = handle_upload_blob(State(state.clone()), headers.clone(), body.clone()).await;
        assert!(matches!(result, Err(GatewayError::Signature(_))));

        let mut forged = headers;
        sign(&mut forged, b"other body");
        let result = handle_upload_blob(State(state), forged, body).await;
        assert!(matches!(result, Err(GatewayError::Signature(_))));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(backend.calls().is_empty());
    }

    /// バックエンドが失敗しても完了通知のレスポンスは成功のまま
    #[tokio::test]
    async fn test_upload_completed_backend_failure_is_not_visible() {
        let backend =
            start_recording_backend(StatusCode::BAD_GATEWAY, Duration::ZERO).await;
        let storage = Arc::new(MockStorage::default());
        let (state, mut reports) = test_state(test_config(), storage.clone());

        let body = completion_body(None);
        let mut headers = headers_for(&format!("127.0.0.1:{}", backend.port), "http");
        sign(&mut headers, &body);

        let result = handle_upload_blob(State(state), headers, body).await;
        assert!(result.is_ok());

        let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(report.result.is_err());
        assert_eq!(backend.calls()[0].body.filename, "docs/a-xyz.pdf");
        assert!(storage.deleted().is_empty());
    }
}
