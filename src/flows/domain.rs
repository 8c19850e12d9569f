//! 领地守卫：Flow 离开自己的页面区域后，先等一个宽限期，再导航回入口

use crate::config::FlowDomain;
use crate::flows::TickContext;
use crate::timing::{ActivityKind, DelayContext};

/// 恢复日志最短间隔
const RECOVERY_LOG_INTERVAL_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainStatus {
    Inside,
    /// 刚离开，仍在宽限期内
    Waiting,
    /// 宽限期已过，需要导航
    Expired,
}

#[derive(Debug, Clone)]
pub struct DomainGuard {
    domain: FlowDomain,
    off_since: Option<u64>,
    last_log_at: Option<u64>,
}

impl DomainGuard {
    pub fn new(domain: FlowDomain) -> Self {
        Self {
            domain,
            off_since: None,
            last_log_at: None,
        }
    }

    pub fn contains(&self, location: &str) -> bool {
        location.contains(&self.domain.fragment)
    }

    pub fn observe(&mut self, location: &str, now_ms: u64) -> DomainStatus {
        if self.contains(location) {
            self.off_since = None;
            return DomainStatus::Inside;
        }
        let since = *self.off_since.get_or_insert(now_ms);
        if now_ms.saturating_sub(since) >= self.domain.grace_ms {
            DomainStatus::Expired
        } else {
            DomainStatus::Waiting
        }
    }

    pub fn reset(&mut self) {
        self.off_since = None;
    }

    /// 导航回入口并返回建议延迟；日志至多每 15 秒一条
    pub async fn recover(
        &mut self,
        cx: &mut TickContext<'_>,
        kind: ActivityKind,
        message: &str,
    ) -> u64 {
        self.off_since = None;
        let due = self
            .last_log_at
            .map_or(true, |at| cx.now_ms.saturating_sub(at) >= RECOVERY_LOG_INTERVAL_MS);
        if due {
            cx.log(message);
            self.last_log_at = Some(cx.now_ms);
        }

        match cx.env.navigate(&self.domain.entry_url).await {
            Ok(()) => cx.delay(kind, 2400, 3600, DelayContext::after_nav()),
            Err(err) => {
                cx.log(format!("Navigation to {} failed: {err}", self.domain.entry_url));
                cx.delay(kind, 3000, 4800, DelayContext::after_nav())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvError, Environment};
    use crate::flows::testing::Harness;

    fn domain() -> FlowDomain {
        FlowDomain {
            entry_url: "https://game.test/battle/arena".into(),
            fragment: "/battle".into(),
            grace_ms: 3_000,
        }
    }

    #[test]
    fn test_grace_window() {
        let mut guard = DomainGuard::new(domain());
        assert_eq!(guard.observe("https://game.test/battle/arena", 0), DomainStatus::Inside);
        assert_eq!(guard.observe("https://game.test/travel", 1_000), DomainStatus::Waiting);
        assert_eq!(guard.observe("https://game.test/travel", 3_500), DomainStatus::Waiting);
        assert_eq!(guard.observe("https://game.test/travel", 4_000), DomainStatus::Expired);
        assert_eq!(guard.observe("https://game.test/battle", 4_100), DomainStatus::Inside);
        assert_eq!(guard.observe("https://game.test/travel", 4_200), DomainStatus::Waiting);
    }

    #[tokio::test]
    async fn test_recover_navigates_to_entry() {
        let mut h = Harness::new("https://game.test/travel");
        let mut guard = DomainGuard::new(domain());
        let mut cx = h.cx();
        let delay = guard.recover(&mut cx, ActivityKind::Combat, "opening arena").await;
        assert!(delay >= 250);
        assert_eq!(h.env.navigations(), vec!["https://game.test/battle/arena".to_string()]);
        assert_eq!(h.env.current_location().await, "https://game.test/battle/arena");
    }

    #[tokio::test]
    async fn test_recover_survives_navigation_error() {
        let mut h = Harness::new("https://game.test/travel");
        h.env
            .set_navigation_error(Some(EnvError::Navigation("timeout".into())));
        let mut guard = DomainGuard::new(domain());
        let mut rx = h.events.subscribe();
        let mut cx = h.cx();
        let delay = guard.recover(&mut cx, ActivityKind::Quest, "opening board").await;
        assert!(delay >= 250);

        let mut messages = Vec::new();
        while let Ok(crate::events::LoopEvent::Log(record)) = rx.try_recv() {
            messages.push(record.message);
        }
        assert!(messages.iter().any(|m| m.contains("failed")));
    }
}
