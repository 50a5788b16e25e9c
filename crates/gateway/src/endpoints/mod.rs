//! # Gatewayエンドポイント

pub mod backend_proxy;
pub mod upload_blob;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use crate::config::GatewayState;

pub use backend_proxy::{handle_backend_delete, handle_backend_get, handle_backend_post};
pub use upload_blob::{handle_upload_blob, UPLOAD_BLOB_PATH};

/// ルーターを構築する。
///
/// `/backend/*` はファイル本体をそのまま中継するため、ボディサイズ上限を外す。
pub fn router(state: Arc<GatewayState>) -> axum::Router {
    axum::Router::new()
        .route(UPLOAD_BLOB_PATH, post(handle_upload_blob))
        .route(
            "/backend/{*path}",
            get(handle_backend_get)
                .post(handle_backend_post)
                .delete(handle_backend_delete)
                .layer(DefaultBodyLimit::disable()),
        )
        .with_state(state)
}
