//! 认证服务主入口

use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use trip_auth::{
    config::AppConfig,
    db,
    middleware::AppState,
    repository::{PgTokenRepository, PgUserRepository},
    routes,
    services::TokenStore,
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("trip-auth {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 生产环境应直接设置环境变量
    if let Ok(name) = std::env::var("AUTH_ENV") {
        dotenv::from_filename(format!(".env.{}", name)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "trip-auth starting");

    // 3. 数据库连接池 + 迁移
    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    // 4. 构建应用状态
    let state = AppState::new(
        config.clone(),
        Arc::new(PgUserRepository::new(pool.clone())),
        Arc::new(PgTokenRepository::new(pool.clone())),
    )?;

    if let Some(email) = &config.security.bootstrap_admin_email {
        match state.auth_service.ensure_admin(email).await? {
            Some(user) => tracing::info!(user_id = %user.id, "Bootstrap admin ready"),
            None => tracing::warn!("Bootstrap admin account is not registered yet"),
        }
    }

    // 5. 后台清理任务
    if config.security.purge_interval_secs > 0 {
        tokio::spawn(purge_loop(
            state.token_store.clone(),
            Duration::from_secs(config.security.purge_interval_secs),
        ));
    }

    // 6. 构建路由并启动服务器
    let app = routes::create_router(state);

    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 7. 优雅关闭
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            config.server.graceful_shutdown_timeout_secs,
        ))
        .await?;

    pool.close().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 定期清理过期的刷新令牌与黑名单条目
async fn purge_loop(store: Arc<TokenStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // 第一次 tick 立即完成，跳过
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = store.purge_expired().await {
            tracing::warn!(error = %e, "Scheduled token purge failed");
        }
    }
}

/// 优雅关闭信号处理
///
/// After the signal, in-flight requests get `timeout_secs` to drain before
/// the process exits regardless.
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        std::process::exit(1);
    });
}

/// 打印帮助信息
fn print_help() {
    println!("trip-auth {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: trip-auth [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --version     Print version and exit");
    println!("  --help        Print this help and exit");
    println!();
    println!("Environment:");
    println!("  AUTH_DATABASE__URL          PostgreSQL connection URL (required)");
    println!("  AUTH_SECURITY__JWT_SECRET   Token signing secret, >= 32 chars (required)");
    println!("  AUTH_ENV                    Load .env.<name> instead of .env");
    println!("  RUST_LOG                    Overrides AUTH_LOGGING__LEVEL");
}
