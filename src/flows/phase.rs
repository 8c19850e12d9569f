//! 阶段追踪：当前阶段 + 该阶段的连续 miss 计数
//!
//! 规则：任何阶段迁移都会清零计数；某阶段连续 miss 达到阈值时退回到预设的上游阶段，并清零。

use std::fmt;

/// 阶段连续 miss 的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissPolicy<P> {
    /// 第 N 次 miss 时退回
    pub threshold: u32,
    pub fallback: P,
    /// 每隔多少次 miss 记一条日志（第 1 次总会记）
    pub log_every: u32,
}

pub trait Phase: Copy + Eq + fmt::Debug + Send {
    fn name(&self) -> &'static str;

    /// None 表示该阶段从不因 miss 而退回
    fn miss_policy(&self) -> Option<MissPolicy<Self>>;
}

/// 一次阶段迁移（诊断用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissOutcome {
    /// 本次 miss 之后（退回之前）的计数
    pub misses: u32,
    pub should_log: bool,
    pub regressed: Option<Transition>,
}

#[derive(Debug, Clone)]
pub struct PhaseTracker<P: Phase> {
    phase: P,
    misses: u32,
}

impl<P: Phase> PhaseTracker<P> {
    pub fn new(initial: P) -> Self {
        Self {
            phase: initial,
            misses: 0,
        }
    }

    pub fn phase(&self) -> P {
        self.phase
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// 迁移到 next 并清零计数
    pub fn advance(&mut self, next: P) -> Transition {
        let transition = Transition {
            from: self.phase.name(),
            to: next.name(),
        };
        self.phase = next;
        self.misses = 0;
        transition
    }

    /// 留在当前阶段，但本轮算作成功
    pub fn hold(&mut self) {
        self.misses = 0;
    }

    pub fn miss(&mut self) -> MissOutcome {
        self.misses = self.misses.saturating_add(1);
        let misses = self.misses;

        let Some(policy) = self.phase.miss_policy() else {
            return MissOutcome {
                misses,
                should_log: misses % 2 == 1,
                regressed: None,
            };
        };

        let every = policy.log_every.max(1);
        let should_log = (misses - 1) % every == 0;
        let regressed = if misses >= policy.threshold {
            Some(self.advance(policy.fallback))
        } else {
            None
        };

        MissOutcome {
            misses,
            should_log,
            regressed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Door {
        Closed,
        Open,
    }

    impl Phase for Door {
        fn name(&self) -> &'static str {
            match self {
                Door::Closed => "closed",
                Door::Open => "open",
            }
        }

        fn miss_policy(&self) -> Option<MissPolicy<Self>> {
            match self {
                Door::Closed => None,
                Door::Open => Some(MissPolicy {
                    threshold: 3,
                    fallback: Door::Closed,
                    log_every: 2,
                }),
            }
        }
    }

    #[test]
    fn test_regresses_on_exact_threshold() {
        let mut tracker = PhaseTracker::new(Door::Closed);
        tracker.advance(Door::Open);

        assert!(tracker.miss().regressed.is_none());
        assert!(tracker.miss().regressed.is_none());
        let third = tracker.miss();
        assert_eq!(third.misses, 3);
        assert_eq!(
            third.regressed,
            Some(Transition {
                from: "open",
                to: "closed"
            })
        );
        assert_eq!(tracker.phase(), Door::Closed);
        assert_eq!(tracker.misses(), 0);
    }

    #[test]
    fn test_transition_resets_counter() {
        let mut tracker = PhaseTracker::new(Door::Open);
        tracker.miss();
        tracker.miss();
        tracker.advance(Door::Open);
        assert_eq!(tracker.misses(), 0);
        assert!(tracker.miss().regressed.is_none());
    }

    #[test]
    fn test_phase_without_policy_never_regresses() {
        let mut tracker = PhaseTracker::new(Door::Closed);
        for _ in 0..50 {
            assert!(tracker.miss().regressed.is_none());
        }
        assert_eq!(tracker.phase(), Door::Closed);
    }

    #[test]
    fn test_log_throttling() {
        let mut tracker = PhaseTracker::new(Door::Open);
        assert!(tracker.miss().should_log);
        assert!(!tracker.miss().should_log);
    }
}
