//! # Blob Relay 共有型定義
//!
//! Gatewayが受け付けるアップロードハンドシェイク、完了通知、
//! バックエンド中継で使用するワイヤ形式をRust構造体として提供する。
//!
//! ## エンコーディング規則
//! - JSONフィールド名は camelCase（ブラウザSDK・ストレージプロバイダ側の形式に合わせる）
//! - 不透明ペイロード（clientPayload / tokenPayload）はJSON文字列として埋め込む

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// 許可コンテンツタイプ
// ---------------------------------------------------------------------------

/// ブラウザからの直接アップロードを許可するMIMEタイプ。
/// PDF, DOCX, PPTX, プレーンテキスト, Markdown, CSV。
pub const ALLOWED_CONTENT_TYPES: [&str; 6] = [
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain",
    "text/markdown",
    "text/csv",
];

// ---------------------------------------------------------------------------
// ハンドシェイク リクエスト
// ---------------------------------------------------------------------------

/// `POST /api/upload-blob` のリクエストボディ。
///
/// ブラウザからのトークン発行要求と、ストレージプロバイダからの
/// アップロード完了通知の両方が同じエンドポイントに届き、`type` で区別される。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum HandleUploadBody {
    /// クライアントトークン発行要求
    #[serde(rename = "blob.generate-client-token")]
    GenerateClientToken(GenerateClientTokenPayload),
    /// アップロード完了通知
    #[serde(rename = "blob.upload-completed")]
    UploadCompleted(UploadCompletedPayload),
}

/// クライアントトークン発行要求のペイロード。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateClientTokenPayload {
    /// アップロード先のパス名（クライアント指定）
    pub pathname: String,
    /// アップロードするファイルのMIMEタイプ。署名付きURLに束縛される。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// 完了通知の送信先URL（クライアントが把握している場合）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// クライアントが付与する不透明ペイロード（JSON文字列）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_payload: Option<String>,
    /// マルチパートアップロードかどうか
    #[serde(default)]
    pub multipart: bool,
}

/// アップロード完了通知のペイロード。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompletedPayload {
    /// 保存されたオブジェクトの記述子
    pub blob: UploadedBlob,
    /// トークン発行時に埋め込んだ不透明ペイロード（無加工で往復する）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_payload: Option<String>,
}

/// ストレージに保存されたオブジェクトの記述子。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedBlob {
    /// オブジェクトのURL
    pub url: String,
    /// ダウンロード用URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// ストレージ上のパス（ランダムサフィックス付与後）
    pub pathname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
}

// ---------------------------------------------------------------------------
// ハンドシェイク レスポンス
// ---------------------------------------------------------------------------

/// `POST /api/upload-blob` のレスポンスボディ。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandleUploadResponse {
    #[serde(rename = "blob.generate-client-token")]
    GenerateClientToken(ClientTokenResponse),
    #[serde(rename = "blob.upload-completed")]
    UploadCompleted(UploadCompletedResponse),
}

/// トークン発行レスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTokenResponse {
    /// 署名済みクライアントトークン
    pub client_token: String,
    /// 署名付きアップロードURL（PUT）
    pub upload_url: String,
    /// 実際に保存されるパス名（ランダムサフィックス付与後）
    pub pathname: String,
    /// 有効期限（UNIXミリ秒）
    pub valid_until: u64,
}

/// 完了通知の受領レスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCompletedResponse {
    /// 常に `"ok"`
    pub response: String,
}

impl UploadCompletedResponse {
    pub fn ok() -> Self {
        Self {
            response: "ok".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// クライアントトークン
// ---------------------------------------------------------------------------

/// クライアントトークンに署名して埋め込む許可内容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTokenGrant {
    /// アップロード先のパス名（ランダムサフィックス付与後）
    pub pathname: String,
    /// 許可MIMEタイプ
    pub allowed_content_types: Vec<String>,
    /// 名前衝突回避のためのランダムサフィックス付与フラグ
    pub add_random_suffix: bool,
    /// 有効期限（UNIXミリ秒）
    pub valid_until: u64,
    /// 完了通知の登録内容。送信先が不明な場合はNone。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_upload_completed: Option<UploadCompletedCallback>,
}

/// 完了通知の送信先と、通知時にそのまま返される不透明ペイロード。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompletedCallback {
    pub callback_url: String,
    pub token_payload: String,
}

/// クライアントが付与する不透明ペイロードの解釈結果。
/// 未知のフィールドは無視する。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPayload {
    #[serde(default)]
    pub original_filename: Option<String>,
}

/// トークン発行時に埋め込み、完了通知で受け取る不透明ペイロード。
/// 元のファイル名を完了通知まで運ぶ唯一の経路。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    #[serde(default)]
    pub pathname: Option<String>,
    #[serde(default)]
    pub original_filename: Option<String>,
}

// ---------------------------------------------------------------------------
// バックエンド通知
// ---------------------------------------------------------------------------

/// `POST {origin}/backend/upload-from-url` のリクエストボディ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFromUrlRequest {
    /// 保存済みオブジェクトのURL
    pub url: String,
    /// 元のファイル名（不明な場合はストレージ上のパス）
    pub filename: String,
}

// ---------------------------------------------------------------------------
// エラーボディ
// ---------------------------------------------------------------------------

/// アップロードハンドシェイク失敗時のレスポンスボディ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// バックエンド中継失敗時のレスポンスボディ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyErrorBody {
    /// 常に `"Proxy error"`
    pub error: String,
    /// 原因となったエラーのメッセージ
    pub detail: String,
    /// 中継しようとしたパス（POSTのみ）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
