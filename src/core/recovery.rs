//! 错误恢复引擎
//!
//! 将 LoopError 映射为 RecoveryAction：验证挑战终止会话，其余错误一律延迟重试（循环自愈而非崩溃）。

use std::time::Duration;

use crate::core::{LoopError, RecoveryAction};

#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    retry_delay: Duration,
}

impl RecoveryEngine {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    pub fn handle(&self, err: &LoopError) -> RecoveryAction {
        match err {
            LoopError::SuppressionDetected(msg) => RecoveryAction::Halt(msg.clone()),
            LoopError::Environment(_) => RecoveryAction::RetryAfter(self.retry_delay),
        }
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvError;

    #[test]
    fn test_recovery_environment_error_retries() {
        let engine = RecoveryEngine::default();
        let err = LoopError::Environment(EnvError::Disconnected("tab closed".into()));
        assert_eq!(
            engine.handle(&err),
            RecoveryAction::RetryAfter(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_recovery_uses_configured_delay() {
        let engine = RecoveryEngine::new(Duration::from_millis(1_500));
        let err = LoopError::Environment(EnvError::Probe("evaluate timed out".into()));
        assert_eq!(
            engine.handle(&err),
            RecoveryAction::RetryAfter(Duration::from_millis(1_500))
        );
    }

    #[test]
    fn test_recovery_suppression_halts() {
        let engine = RecoveryEngine::default();
        let err = LoopError::SuppressionDetected("captcha".into());
        match engine.handle(&err) {
            RecoveryAction::Halt(msg) => assert!(msg.contains("captcha")),
            other => panic!("Expected Halt, got {other:?}"),
        }
    }
}
