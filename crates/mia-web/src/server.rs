//! Web服务器

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use mia_core::{ArchiveError, Result};
use mia_database::HierarchyRepository;
use mia_extract::ScriptExtractor;
use mia_ingest::IngestOrchestrator;
use mia_storage::LocalContentStore;

use crate::handlers::{
    api_root, download_file, get_file, get_patient, get_series, get_study, health, list_patients,
    upload_file,
};

/// 生产装配下的摄取编排器
pub type ArchiveOrchestrator =
    IngestOrchestrator<LocalContentStore, ScriptExtractor, HierarchyRepository>;

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ArchiveOrchestrator>,
    pub repository: HierarchyRepository,
    pub store: Arc<LocalContentStore>,
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState, max_upload_bytes: usize) -> Self {
        let app = Self::create_app(state, max_upload_bytes);
        Self { addr, app }
    }

    fn create_app(state: AppState, max_upload_bytes: usize) -> Router {
        Router::new()
            // 根路径
            .route("/", get(api_root))
            // 健康检查
            .route("/health", get(health))
            // API路由
            .nest("/api/v1", api_routes())
            .with_state(state)
            // 上传体积上限
            .layer(DefaultBodyLimit::max(max_upload_bytes))
            // 全局中间件
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    ),
            )
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| ArchiveError::Internal(format!("web server terminated: {e}")))?;

        Ok(())
    }
}

/// API v1 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/files", post(upload_file))
        .route("/files/:id", get(get_file))
        .route("/files/:id/content", get(download_file))
        .route("/patients", get(list_patients))
        .route("/patients/:id", get(get_patient))
        .route("/studies/:id", get(get_study))
        .route("/series/:id", get(get_series))
}
