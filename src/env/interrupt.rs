//! 中断检测：会话级致命条件
//!
//! 无状态；检测到验证信号时返回 Interrupt，编排器据此停止循环并告警，不再重新调度。

use serde::Serialize;

use crate::env::Environment;
use crate::events::AlertKind;

/// 已触发的中断
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interrupt {
    pub kind: AlertKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InterruptDetector;

impl InterruptDetector {
    pub fn new() -> Self {
        Self
    }

    pub async fn check(&self, env: &dyn Environment) -> Option<Interrupt> {
        if env.detect_suppression_signal().await {
            Some(Interrupt {
                kind: AlertKind::Captcha,
                message: "CAPTCHA / anti-bot verification detected; solve it manually, then restart"
                    .to_string(),
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ScriptedEnvironment;

    #[tokio::test]
    async fn test_detector_trips_on_signal() {
        let env = ScriptedEnvironment::new("https://game.test/travel");
        let detector = InterruptDetector::new();
        assert!(detector.check(&env).await.is_none());

        env.set_suppression(true);
        let interrupt = detector.check(&env).await.expect("should trip");
        assert_eq!(interrupt.kind, AlertKind::Captcha);
    }
}
