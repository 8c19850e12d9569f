//! 循环错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：除验证挑战外，所有 tick 级错误都视为暂时性，固定延迟后重试。

use std::time::Duration;

use thiserror::Error;

use crate::env::EnvError;

/// tick 级错误（Flow 内部已吸收的暂时性环境错误不会出现在这里）
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Environment error: {0}")]
    Environment(#[from] EnvError),

    #[error("Suppression signal detected: {0}")]
    SuppressionDetected(String),
}

/// 恢复引擎根据错误给出的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 记录日志后按固定延迟重新调度
    RetryAfter(Duration),
    /// 停止循环、告警，等待人工处理
    Halt(String),
}
