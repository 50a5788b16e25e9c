//! # アップロード許可の構築
//!
//! クライアントトークン発行時の許可内容（許可MIMEタイプ、ランダムサフィックス、
//! 不透明ペイロード）を組み立て、HMACで封入する。ストレージには触れない。

use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use relay_types::{
    ClientPayload, ClientTokenGrant, TokenPayload, UploadCompletedCallback, ALLOWED_CONTENT_TYPES,
};

use crate::error::GatewayError;

/// パス名に付与するランダムサフィックスの長さ
pub const RANDOM_SUFFIX_LEN: usize = 21;

/// 発行済みの許可と、それを封入したクライアントトークン。
#[derive(Debug)]
pub struct IssuedGrant {
    pub grant: ClientTokenGrant,
    pub client_token: String,
}

/// パス名にランダムサフィックスを付与する。拡張子とディレクトリは保持する。
///
/// `docs/report.pdf` → `docs/report-<suffix>.pdf`
pub fn randomize_pathname(pathname: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(char::from)
        .collect();
    with_suffix(pathname, &suffix)
}

fn with_suffix(pathname: &str, suffix: &str) -> String {
    let (dir, file) = match pathname.rfind('/') {
        Some(i) => pathname.split_at(i + 1),
        None => ("", pathname),
    };
    match file.rfind('.') {
        Some(dot) if dot > 0 => format!("{dir}{}-{suffix}{}", &file[..dot], &file[dot..]),
        _ => format!("{dir}{file}-{suffix}"),
    }
}

/// クライアントペイロードを解釈する。未指定・パース不能は空オブジェクト扱い。
pub fn parse_client_payload(client_payload: Option<&str>) -> ClientPayload {
    match client_payload {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "clientPayloadをパースできないため空として扱います");
            ClientPayload::default()
        }),
        _ => ClientPayload::default(),
    }
}

/// アップロード予定のMIMEタイプを検査する。未指定や許可リスト外は拒否する。
pub fn check_content_type(content_type: Option<&str>) -> Result<&str, GatewayError> {
    let content_type = content_type
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GatewayError::BadRequest("contentTypeが指定されていません".to_string()))?;
    if !ALLOWED_CONTENT_TYPES.contains(&content_type) {
        return Err(GatewayError::BadRequest(format!(
            "許可されていないcontentTypeです: {content_type}"
        )));
    }
    Ok(content_type)
}

/// 完了通知まで往復させる不透明ペイロードを構築する。
/// 元のファイル名が無ければパス名で代用する。
pub fn build_token_payload(pathname: &str, client_payload: &ClientPayload) -> TokenPayload {
    let original_filename = client_payload
        .original_filename
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| pathname.to_string());
    TokenPayload {
        pathname: Some(pathname.to_string()),
        original_filename: Some(original_filename),
    }
}

/// 許可を構築し、クライアントトークンに封入する。
///
/// `now_ms` はUNIXミリ秒。`callback_url` がNoneの場合は完了通知を登録しない。
pub fn issue_grant(
    secret: &[u8],
    pathname: &str,
    client_payload: Option<&str>,
    callback_url: Option<String>,
    ttl: Duration,
    now_ms: u64,
) -> Result<IssuedGrant, GatewayError> {
    let payload = parse_client_payload(client_payload);
    let token_payload = serde_json::to_string(&build_token_payload(pathname, &payload))
        .map_err(|e| GatewayError::Internal(format!("tokenPayloadのシリアライズに失敗: {e}")))?;

    let grant = ClientTokenGrant {
        pathname: randomize_pathname(pathname),
        allowed_content_types: ALLOWED_CONTENT_TYPES.iter().map(|t| t.to_string()).collect(),
        add_random_suffix: true,
        valid_until: now_ms.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
        on_upload_completed: callback_url.map(|callback_url| UploadCompletedCallback {
            callback_url,
            token_payload,
        }),
    };

    let grant_bytes = serde_json::to_vec(&grant)
        .map_err(|e| GatewayError::Internal(format!("許可内容のシリアライズに失敗: {e}")))?;
    let client_token = relay_crypto::seal_token(secret, &grant_bytes)
        .map_err(|e| GatewayError::Internal(format!("クライアントトークンの署名に失敗: {e}")))?;

    Ok(IssuedGrant {
        grant,
        client_token,
    })
}

#[cfg(test)]
pub(crate) fn open_client_token(secret: &[u8], token: &str) -> ClientTokenGrant {
    let bytes = relay_crypto::open_token(secret, token).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
