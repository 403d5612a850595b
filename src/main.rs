use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webhook_config::{AppConfig, LogFormat};
use webhook_relay::{
    app::{AppMode, Application},
    shutdown::ShutdownManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("webhook-relay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("可靠的出站Webhook投递服务")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时依次查找默认位置"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式，once表示执行一次批次后退出")
                .value_parser(["api", "dispatcher", "all", "once"])
                .default_value("all"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mode_str = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all");

    let config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = match matches.get_one::<String>("log-format").map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some(_) => LogFormat::Pretty,
        None => config.observability.log_format,
    };
    init_logging(&log_level, &log_format)?;

    info!("启动Webhook投递服务");
    info!("配置文件: {}", config_path.unwrap_or("<默认位置>"));
    info!("运行模式: {mode_str}");

    let app_mode = AppMode::resolve(mode_str, &config)?;
    let app = Application::new(config, app_mode).await?;

    if app_mode == AppMode::Once {
        let result = app.run_once().await;
        app.close().await;
        let summary = result?;
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("序列化投递摘要失败")?
        );
        return Ok(());
    }

    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let app = Arc::new(app);
        let shutdown_rx = shutdown_manager.subscribe().await;

        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;

            match tokio::time::timeout(Duration::from_secs(30), &mut app_handle).await {
                Ok(Ok(Ok(()))) => info!("应用已优雅关闭"),
                Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {:#}", e),
                Ok(Err(e)) => error!("应用任务异常退出: {}", e),
                Err(_) => {
                    warn!("应用关闭超时，强制退出");
                    app_handle.abort();
                }
            }
        }
        result = &mut app_handle => {
            // 组件提前退出，例如端口绑定失败
            shutdown_manager.shutdown().await;
            match result {
                Ok(Ok(())) => info!("应用已退出"),
                Ok(Err(e)) => return Err(e.context("应用运行失败")),
                Err(e) => return Err(anyhow::anyhow!("应用任务异常退出: {e}")),
            }
        }
    }

    info!("Webhook投递服务已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        LogFormat::Pretty => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
    }

    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
