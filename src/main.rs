//! Stride 入口：初始化日志、加载配置、启动浏览器环境与主循环，直到中断或收到关闭信号。

use anyhow::Context;
use stride::{load_config, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    run(cfg).await
}

#[cfg(feature = "browser")]
async fn run(cfg: stride::AppConfig) -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::broadcast::error::RecvError;

    use stride::core::{
        run_with_graceful_shutdown, OrchestratorCleanup, ShutdownCoordinator, ShutdownManager,
        ShutdownReason,
    };
    use stride::env::ChromeEnvironment;
    use stride::{Environment, EventBus, LoopEvent, LoopSettings, Orchestrator, SessionState};

    let browser_cfg = cfg.browser.clone();
    let env = tokio::task::spawn_blocking(move || ChromeEnvironment::launch(&browser_cfg))
        .await
        .context("Browser launch task failed")?
        .context("Failed to launch Chrome")?;
    let start_url = cfg
        .browser
        .start_url
        .clone()
        .unwrap_or_else(|| cfg.travel.entry_url.clone());
    env.navigate(&start_url)
        .await
        .with_context(|| format!("Failed to open {}", start_url))?;

    let events = EventBus::new();
    let orchestrator = Arc::new(Orchestrator::new(events.clone()));
    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    coordinator.register(OrchestratorCleanup::new(Arc::clone(&orchestrator)));

    // 循环因验证挑战自停时，以告警内容作为关闭原因
    let mut rx = events.subscribe();
    let halted = async move {
        loop {
            match rx.recv().await {
                Ok(LoopEvent::Alert { message, .. }) => return ShutdownReason::Halted(message),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return ShutdownReason::Halted("event bus closed".into()),
            }
        }
    };

    orchestrator.start(Arc::new(env), LoopSettings::from(&cfg), SessionState::default());

    let reason =
        run_with_graceful_shutdown(Arc::new(ShutdownManager::new()), halted, coordinator).await;
    tracing::info!(reason = ?reason, "stride exited");
    Ok(())
}

#[cfg(not(feature = "browser"))]
async fn run(_cfg: stride::AppConfig) -> anyhow::Result<()> {
    anyhow::bail!("stride was built without a browser environment; rebuild with `--features browser`")
}
