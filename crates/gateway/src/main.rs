//! # Blob Relay Gateway
//!
//! ブラウザからオブジェクトストレージへの直接アップロードを仲介し、
//! バックエンドへのリクエストを中継するエッジサーバー。
//!
//! ## 役割
//! - 直接アップロード用クライアントトークンの発行（プラットフォームのボディ上限の回避）
//! - アップロード完了通知を受けたバックエンドへの取り込み依頼と一時オブジェクトの削除
//! - `/backend/*` のバックエンド中継
//!
//! ## API エンドポイント
//! - `POST /api/upload-blob` — トークン発行 / 完了通知の受付
//! - `GET|POST|DELETE /backend/{*path}` — `{BACKEND_URL}/backend/{path}` への中継

mod config;
mod endpoints;
mod error;
mod grant;
mod notifier;
mod origin;
mod storage;

#[cfg(test)]
mod test_helpers;

use std::sync::Arc;

use config::{GatewayConfig, GatewayState};
use notifier::{CompletionNotifier, NotifierContext};
use storage::BlobStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Arc::new(GatewayConfig::from_env()?);
    tracing::info!(
        backend_url = %config.backend_url,
        deployment_host = ?config.deployment_host,
        protection_bypass = config.protection_bypass_secret.is_some(),
        "設定を読み込みました"
    );

    let storage = build_storage(&config)?;
    let http_client = reqwest::Client::new();

    let notifier = CompletionNotifier::spawn(Arc::new(NotifierContext {
        config: config.clone(),
        http_client: http_client.clone(),
        storage: storage.clone(),
    }));

    let state = Arc::new(GatewayState {
        config: config.clone(),
        http_client,
        storage,
        notifier: notifier.clone(),
    });

    let app = endpoints::router(state);

    let addr = config.listen_addr.as_str();
    tracing::info!("Gatewayを {} で起動します", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 受付済みの完了通知を処理しきってから終了する
    notifier.shutdown(config.notify_timeout).await;

    tracing::info!("Gatewayを停止しました");
    Ok(())
}

#[cfg(feature = "vendor-aws")]
fn build_storage(config: &GatewayConfig) -> anyhow::Result<Arc<dyn BlobStorage>> {
    Ok(Arc::new(storage::S3BlobStorage::from_config(&config.storage)?))
}

#[cfg(not(feature = "vendor-aws"))]
fn build_storage(_config: &GatewayConfig) -> anyhow::Result<Arc<dyn BlobStorage>> {
    anyhow::bail!("ストレージ実装が有効化されていません（vendor-aws featureが必要です）")
}

/// SIGTERM または Ctrl-C で解決する。受付を止め、処理中のリクエストは完了させる。
/// その後 `main` が完了通知ワーカーを停止する。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Ctrl-Cハンドラの登録に失敗: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("SIGTERMハンドラの登録に失敗: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
    tracing::info!("停止シグナルを受信しました");
}
