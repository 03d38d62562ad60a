//! 归档服务器主程序

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use mia_core::config::ArchiveConfig;
use mia_database::{DatabasePool, HierarchyRepository};
use mia_extract::ScriptExtractor;
use mia_ingest::IngestOrchestrator;
use mia_storage::{LocalContentStore, OverwritePolicy};
use mia_web::{AppState, WebServer};

/// 归档服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "mia-server")]
#[command(about = "医学影像元数据归档服务器")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 监听端口（覆盖配置文件）
    #[arg(short, long)]
    port: Option<u16>,

    /// 上传文件存储目录（覆盖配置文件）
    #[arg(short, long)]
    storage_dir: Option<String>,

    /// 数据库连接串（覆盖配置文件）
    #[arg(short, long)]
    database_url: Option<String>,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .init();

    let mut config =
        ArchiveConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.storage_dir {
        config.storage.root_path = dir;
    }
    if let Some(url) = args.database_url {
        config.database.url = url;
    }

    info!("归档服务器配置:");
    info!("  监听地址: {}:{}", config.server.host, config.server.port);
    info!("  存储目录: {}", config.storage.root_path);
    info!("  提取器: {}", config.extractor.program);

    // 内容存储
    let policy = if config.storage.allow_overwrite {
        OverwritePolicy::Replace
    } else {
        OverwritePolicy::Reject
    };
    let store = Arc::new(LocalContentStore::new(&config.storage.root_path, policy));
    store
        .ensure_root()
        .await
        .context("failed to create storage root")?;

    // 数据库连接与表结构
    let pool = DatabasePool::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    let repository = HierarchyRepository::new(pool);
    repository
        .init_schema()
        .await
        .context("failed to initialize database schema")?;

    // 提取器与摄取编排器
    let extractor = Arc::new(ScriptExtractor::from_config(&config.extractor));
    let orchestrator = Arc::new(IngestOrchestrator::new(
        Arc::clone(&store),
        extractor,
        Arc::new(repository.clone()),
    ));

    let state = AppState {
        orchestrator,
        repository,
        store,
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;

    WebServer::new(addr, state, config.server.max_upload_bytes)
        .run()
        .await?;

    Ok(())
}
