//! 进程退出：把 Ctrl+C、SIGTERM 与主循环自停（验证挑战）汇成一次关闭
//!
//! 第一个到达的原因生效并被记录；随后按注册顺序执行清理，每项受同一超时约束。
//! 清理时停止 Orchestrator，进行中的 tick 照常跑完，不会被强行打断。

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::Orchestrator;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 主循环因验证挑战等原因自行停止，附带告警内容
    Halted(String),
}

pub struct ShutdownManager {
    token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Mutex::new(None),
        }
    }

    /// 触发关闭；重复调用只保留第一个原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return;
            }
            match &reason {
                ShutdownReason::Halted(message) => {
                    tracing::warn!(reason = %message, "run halted, shutting down")
                }
                other => tracing::info!(reason = ?other, "shutdown requested"),
            }
            *slot = Some(reason);
        }
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装 Ctrl+C / SIGTERM 监听
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// timeout：单个清理任务的上限
    pub fn new(timeout: Duration) -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) {
        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!(task = name, "cleanup done"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "cleanup failed"),
                Err(_) => tracing::warn!(
                    task = name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "cleanup timed out"
                ),
            }
        }
    }
}

/// 停止主循环
pub struct OrchestratorCleanup {
    orchestrator: Arc<Orchestrator>,
}

impl OrchestratorCleanup {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for OrchestratorCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.orchestrator.stop();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "orchestrator"
    }
}

/// 等待 `halted`（主循环自停时给出原因）或系统信号，先到者触发关闭，然后执行清理
pub async fn run_with_graceful_shutdown<F>(
    manager: Arc<ShutdownManager>,
    halted: F,
    coordinator: ShutdownCoordinator,
) -> ShutdownReason
where
    F: Future<Output = ShutdownReason>,
{
    manager.install_signal_handlers();

    tokio::select! {
        reason = halted => manager.shutdown(reason),
        _ = manager.wait_for_shutdown() => {}
    }

    coordinator.run_cleanup().await;
    manager
        .reason()
        .unwrap_or(ShutdownReason::UserInitiated)
}
