//! # Blob Relay 署名処理
//!
//! クライアントトークンとアップロード完了通知の改ざん検知に使用する
//! HMAC-SHA256ベースの署名プリミティブ。
//!
//! ## 形式
//! | 用途 | 形式 |
//! |------|------|
//! | クライアントトークン | `base64url(JSON) + "." + hex(HMAC-SHA256(secret, base64url部))` |
//! | 完了通知署名 | `hex(HMAC-SHA256(secret, 生ボディ))` |

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// 署名処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// HMAC鍵が不正
    #[error("HMAC鍵が不正です")]
    InvalidKey,
    /// 署名が一致しない
    #[error("署名検証に失敗しました")]
    SignatureMismatch,
    /// トークン形式が不正
    #[error("トークン形式が不正です: {0}")]
    MalformedToken(String),
}

/// Base64エンジン（URL-safe, パディングなし）
fn b64url() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
}

fn mac(secret: &[u8], message: &[u8]) -> Result<HmacSha256, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| CryptoError::InvalidKey)?;
    mac.update(message);
    Ok(mac)
}

/// HMAC-SHA256の計算。
pub fn hmac_sha256(secret: &[u8], message: &[u8]) -> Result<[u8; 32], CryptoError> {
    Ok(mac(secret, message)?.finalize().into_bytes().into())
}

/// HMAC-SHA256タグの定数時間検証。
pub fn hmac_sha256_verify(secret: &[u8], message: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
    mac(secret, message)?
        .verify_slice(tag)
        .map_err(|_| CryptoError::SignatureMismatch)
}

/// 生ボディに対する16進署名を生成する。
pub fn sign_body(secret: &[u8], body: &[u8]) -> Result<String, CryptoError> {
    Ok(hex::encode(hmac_sha256(secret, body)?))
}

/// 16進署名を検証する。
pub fn verify_body_signature(
    secret: &[u8],
    body: &[u8],
    signature_hex: &str,
) -> Result<(), CryptoError> {
    let tag = hex::decode(signature_hex.trim()).map_err(|_| CryptoError::SignatureMismatch)?;
    hmac_sha256_verify(secret, body, &tag)
}

/// ペイロードを署名付きトークンに封入する。
pub fn seal_token(secret: &[u8], payload: &[u8]) -> Result<String, CryptoError> {
    let encoded = b64url().encode(payload);
    let signature = hex::encode(hmac_sha256(secret, encoded.as_bytes())?);
    Ok(format!("{encoded}.{signature}"))
}

/// 署名付きトークンを検証し、ペイロードを取り出す。
pub fn open_token(secret: &[u8], token: &str) -> Result<Vec<u8>, CryptoError> {
    let (encoded, signature) = token
        .split_once('.')
        .ok_or_else(|| CryptoError::MalformedToken("区切り文字がありません".to_string()))?;
    let tag = hex::decode(signature)
        .map_err(|e| CryptoError::MalformedToken(format!("署名の16進デコードに失敗: {e}")))?;
    hmac_sha256_verify(secret, encoded.as_bytes(), &tag)?;
    b64url()
        .decode(encoded)
        .map_err(|e| CryptoError::MalformedToken(format!("ペイロードのBase64デコードに失敗: {e}")))
}
