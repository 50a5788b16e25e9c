//! # アップロード完了通知ワーカー
//!
//! ストレージプロバイダからの完了通知を受け、バックエンドに
//! `POST {origin}/backend/upload-from-url` で引き渡し、成功したら一時オブジェクトを削除する。
//!
//! ## 処理フロー
//! 1. tokenPayloadから元のファイル名を復元
//! 2. 送信先オリジンを解決（`crate::origin`）
//! 3. `{url, filename}` を送信（上限 `notify_timeout`、超過時は呼び出しを破棄）
//! 4. 非2xxはログのみで放棄（リトライ無し、オブジェクトは残る）
//! 5. 成功時に一時オブジェクトを削除
//!
//! 完了通知のレスポンスはこの処理を待たない。失敗はクライアントに届かないため、
//! `tracing` のイベントとレポートチャネルでのみ観測できる。
//! 停止時は `CompletionNotifier::shutdown` で受付済みのジョブを待ち、
//! 間に合わなかったものは中断として記録する。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_types::{TokenPayload, UploadFromUrlRequest, UploadedBlob};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::origin::resolve_backend_origin;
use crate::storage::BlobStorage;

/// デプロイメント保護のバイパスヘッダ
pub const PROTECTION_BYPASS_HEADER: &str = "x-vercel-protection-bypass";

/// バックエンドの取り込みエンドポイント
pub const UPLOAD_FROM_URL_PATH: &str = "/backend/upload-from-url";

/// ワーカーに投入する完了通知1件。
#[derive(Debug, Clone)]
pub struct CompletionJob {
    /// 保存されたオブジェクト
    pub blob: UploadedBlob,
    /// トークン発行時に埋め込んだ不透明ペイロード
    pub token_payload: Option<String>,
    /// 完了通知を受けたリクエストのオリジン
    pub request_origin: Option<String>,
}

/// バックエンドへの引き渡しが成功した後の結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// 一時オブジェクトも削除済み
    Cleaned,
    /// 引き渡しは成功したが削除に失敗（オブジェクトが残る）
    CleanupFailed(String),
}

/// 完了通知処理のエラー型。クライアントには返さず、ログにのみ出す。
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("tokenPayloadのパースに失敗: {0}")]
    TokenPayload(String),
    #[error("バックエンドへの送信に失敗: {0}")]
    Request(String),
    #[error("バックエンド呼び出しがタイムアウトしました ({0:?})")]
    Timeout(Duration),
    #[error("バックエンド処理に失敗: HTTP {status} - {body}")]
    Backend { status: u16, body: String },
    #[error("バックエンドレスポンスのパースに失敗: {0}")]
    BackendResponse(String),
    #[error("停止時の猶予時間内に終わらず中断しました")]
    Abandoned,
}

/// 1件分の処理結果。レポートチャネルに流れる。
#[derive(Debug)]
pub struct CompletionReport {
    pub pathname: String,
    pub result: Result<CompletionOutcome, NotifyError>,
}

/// ワーカーが参照する依存。
pub struct NotifierContext {
    pub config: Arc<GatewayConfig>,
    pub http_client: reqwest::Client,
    pub storage: Arc<dyn BlobStorage>,
}

/// 完了通知ワーカーへの投入口。
///
/// 受け取ったジョブは個別のタスクで並行に処理され、順序は保証しない。
#[derive(Clone)]
pub struct CompletionNotifier {
    tx: mpsc::UnboundedSender<CompletionJob>,
    /// 停止要求。値は処理中ジョブを待つ猶予時間。
    stop: Arc<watch::Sender<Option<Duration>>>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CompletionNotifier {
    /// ワーカーを起動する。
    pub fn spawn(ctx: Arc<NotifierContext>) -> Self {
        Self::spawn_with_reports(ctx, None)
    }

    /// ワーカーを起動し、処理結果を `reports` にも送る。
    pub fn spawn_with_reports(
        ctx: Arc<NotifierContext>,
        reports: Option<mpsc::UnboundedSender<CompletionReport>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(None);
        let worker = tokio::spawn(worker_loop(ctx, rx, stop_rx, reports));
        Self {
            tx,
            stop: Arc::new(stop),
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// ジョブを投入する。処理の完了は待たない。
    pub fn dispatch(&self, job: CompletionJob) -> Result<(), GatewayError> {
        self.tx
            .send(job)
            .map_err(|_| GatewayError::Internal("完了通知ワーカーが停止しています".to_string()))
    }

    /// 新規ジョブの受付を止め、受付済みのジョブを最大 `grace` だけ待つ。
    ///
    /// 猶予を過ぎても終わらないジョブは中断し、pathname付きでログに残す。
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.stop.send(Some(grace));
        let worker = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "完了通知ワーカーが異常終了しました");
            }
        }
    }
}

async fn worker_loop(
    ctx: Arc<NotifierContext>,
    mut rx: mpsc::UnboundedReceiver<CompletionJob>,
    mut stop: watch::Receiver<Option<Duration>>,
    reports: Option<mpsc::UnboundedSender<CompletionReport>>,
) {
    tracing::info!("完了通知ワーカーを起動しました");

    let (abandon_tx, abandon_rx) = watch::channel(false);
    let mut jobs = JoinSet::new();

    let grace = loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(job) => {
                    jobs.spawn(run_job(ctx.clone(), job, reports.clone(), abandon_rx.clone()));
                }
                None => break ctx.config.notify_timeout,
            },
            _ = stop.changed() => {
                let grace = *stop.borrow();
                break grace.unwrap_or(ctx.config.notify_timeout);
            }
            // 終了済みタスクを回収する
            Some(_) = jobs.join_next(), if !jobs.is_empty() => {}
        }
    };

    // 停止前に受領済みのジョブも処理対象にする
    rx.close();
    while let Ok(job) = rx.try_recv() {
        jobs.spawn(run_job(ctx.clone(), job, reports.clone(), abandon_rx.clone()));
    }

    if !jobs.is_empty() {
        tracing::info!(in_flight = jobs.len(), "処理中の完了通知を待機します");
    }
    let drained = tokio::time::timeout(grace, async {
        while jobs.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            remaining = jobs.len(),
            "猶予時間内に終わらなかった完了通知を中断します"
        );
        let _ = abandon_tx.send(true);
        while jobs.join_next().await.is_some() {}
    }

    tracing::info!("完了通知ワーカーを終了します");
}

/// ジョブ1件を処理し、結果をログとレポートチャネルに出す。
async fn run_job(
    ctx: Arc<NotifierContext>,
    job: CompletionJob,
    reports: Option<mpsc::UnboundedSender<CompletionReport>>,
    mut abandon: watch::Receiver<bool>,
) {
    let pathname = job.blob.pathname.clone();
    let result = tokio::select! {
        result = process_completion(&ctx, job) => result,
        () = wait_abandoned(&mut abandon) => Err(NotifyError::Abandoned),
    };
    match &result {
        Ok(CompletionOutcome::Cleaned) => {
            tracing::info!(pathname = %pathname, "一時オブジェクトを削除しました");
        }
        Ok(CompletionOutcome::CleanupFailed(reason)) => {
            tracing::error!(
                pathname = %pathname,
                reason = %reason,
                "バックエンド処理は成功しましたが一時オブジェクトの削除に失敗しました"
            );
        }
        Err(e) => {
            tracing::error!(pathname = %pathname, error = %e, "アップロードの後処理に失敗");
        }
    }
    if let Some(reports) = reports {
        let _ = reports.send(CompletionReport { pathname, result });
    }
}

async fn wait_abandoned(abandon: &mut watch::Receiver<bool>) {
    if abandon.wait_for(|abandoned| *abandoned).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// tokenPayloadを復元する。未指定・空は空オブジェクト扱い。
fn decode_token_payload(raw: Option<&str>) -> Result<TokenPayload, NotifyError> {
    match raw {
        Some(raw) if !raw.is_empty() => {
            serde_json::from_str(raw).map_err(|e| NotifyError::TokenPayload(e.to_string()))
        }
        _ => Ok(TokenPayload::default()),
    }
}

/// 完了通知1件を処理する。
pub async fn process_completion(
    ctx: &NotifierContext,
    job: CompletionJob,
) -> Result<CompletionOutcome, NotifyError> {
    let payload = decode_token_payload(job.token_payload.as_deref())?;

    let origin = resolve_backend_origin(
        job.request_origin.as_deref(),
        ctx.config.deployment_host.as_deref(),
    );
    let notification = UploadFromUrlRequest {
        url: job.blob.url.clone(),
        filename: payload
            .original_filename
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| job.blob.pathname.clone()),
    };
    let url = format!("{origin}{UPLOAD_FROM_URL_PATH}");

    tracing::info!(
        backend = %url,
        blob_url = %notification.url,
        filename = %notification.filename,
        "バックエンドに取り込みを依頼します"
    );

    let mut request = ctx.http_client.post(&url).json(&notification);
    if let Some(secret) = &ctx.config.protection_bypass_secret {
        request = request.header(PROTECTION_BYPASS_HEADER, secret);
    }

    // 期限を過ぎたらフューチャごと破棄して送信中の呼び出しを中断する
    let timeout = ctx.config.notify_timeout;
    let (status, body) = tokio::time::timeout(timeout, async {
        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NotifyError::Request(format!("レスポンス読み取り失敗: {e}")))?;
        Ok::<_, NotifyError>((status, body))
    })
    .await
    .map_err(|_| NotifyError::Timeout(timeout))??;

    tracing::info!(status = %status, "バックエンドのレスポンスを受信");

    if !status.is_success() {
        return Err(NotifyError::Backend {
            status: status.as_u16(),
            body,
        });
    }

    let result: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| NotifyError::BackendResponse(e.to_string()))?;
    tracing::info!(result = %result, "バックエンド処理に成功");

    match ctx.storage.delete_object(&job.blob.pathname).await {
        Ok(()) => Ok(CompletionOutcome::Cleaned),
        Err(e) => Ok(CompletionOutcome::CleanupFailed(e.to_string())),
    }
}
