//! Flow 状态机：每类活动一个（battle / combat / quests / travel）
//!
//! 每个 Flow 只暴露 `advance`：读取当前环境，至多执行一个对外可见的动作，
//! 返回建议延迟与可选的阶段迁移。暂时性环境错误在 Flow 内部吸收为 miss；
//! 只有连接断开这类错误才会上抛给编排器。

pub mod battle;
pub mod burst;
pub mod combat;
pub mod domain;
pub mod phase;
pub mod quest;
pub mod travel;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::FlowFlags;
use crate::core::{LoopError, SessionState};
use crate::env::{ElementHandle, EnvError, Environment, Target};
use crate::events::EventBus;
use crate::timing::{ActivityClass, ActivityKind, DelayContext, Pacing};

pub use battle::{BattleFlow, BattlePhase, FightPriority};
pub use burst::{should_burst, BurstChange, BurstGate};
pub use combat::CombatFlow;
pub use domain::{DomainGuard, DomainStatus};
pub use phase::{MissOutcome, MissPolicy, Phase, PhaseTracker, Transition};
pub use quest::{QuestFlow, QuestPhase};
pub use travel::{TravelFlow, TravelPhase};

/// 活动类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowKind {
    #[serde(rename = "battle")]
    Battle,
    #[serde(rename = "combat")]
    Combat,
    #[serde(rename = "quests", alias = "quest")]
    Quest,
    #[serde(rename = "travel")]
    Travel,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Battle => "battle",
            Self::Combat => "combat",
            Self::Quest => "quests",
            Self::Travel => "travel",
        }
    }

    /// 节流惩罚归属的类别；任务与旅行共用 gather
    pub fn throttle_class(&self) -> ActivityClass {
        match self {
            Self::Battle => ActivityClass::Battle,
            Self::Combat => ActivityClass::Combat,
            Self::Quest | Self::Travel => ActivityClass::Gather,
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次 advance 的结果；delay_ms 为 0 表示「本轮无事可做」
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowStep {
    pub delay_ms: u64,
    pub transition: Option<Transition>,
    /// 本轮动作成功（用于回落节流惩罚）
    pub progress: bool,
}

impl FlowStep {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn wait(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::default()
        }
    }

    /// 动作成功，阶段不变
    pub fn acted(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            transition: None,
            progress: true,
        }
    }

    /// 动作成功并迁移阶段
    pub fn moved(delay_ms: u64, transition: Transition) -> Self {
        Self {
            delay_ms,
            transition: Some(transition),
            progress: true,
        }
    }

    pub fn with_transition(mut self, transition: Option<Transition>) -> Self {
        self.transition = transition;
        self
    }

    pub fn is_actionable(&self) -> bool {
        self.delay_ms > 0
    }
}

/// 单轮 tick 内借给 Flow 的上下文
pub struct TickContext<'a> {
    pub env: &'a dyn Environment,
    pub session: &'a mut SessionState,
    pub pacing: &'a mut Pacing,
    pub events: &'a EventBus,
    pub flags: FlowFlags,
    /// tick 开始时刻（毫秒，来自运行时钟）
    pub now_ms: u64,
}

impl TickContext<'_> {
    pub fn delay(&mut self, kind: ActivityKind, min_ms: u64, max_ms: u64, ctx: DelayContext) -> u64 {
        self.pacing.pacer.human_delay(kind, min_ms, max_ms, ctx)
    }

    pub fn log(&self, message: impl Into<String>) {
        self.events.log(message);
    }

    pub fn publish_stats(&self) {
        self.events.stats(self.session);
    }
}

#[async_trait]
pub trait Flow: Send {
    fn kind(&self) -> FlowKind;

    /// 当前阶段名（日志 / 诊断用）
    fn phase_name(&self) -> &'static str;

    async fn advance(&mut self, cx: &mut TickContext<'_>) -> Result<FlowStep, LoopError>;

    /// 回到初始阶段并清空计数
    fn reset(&mut self);
}

/// 查找目标；暂时性探针错误按「未找到」处理，断线上抛
pub(crate) async fn probe(
    env: &dyn Environment,
    target: Target,
) -> Result<Option<ElementHandle>, LoopError> {
    match env.locate(target).await {
        Ok(found) => Ok(found),
        Err(EnvError::Disconnected(reason)) => Err(EnvError::Disconnected(reason).into()),
        Err(err) => {
            tracing::debug!(target = %target, error = %err, "probe failed, treating as not found");
            Ok(None)
        }
    }
}

/// 按顺序查找，返回第一个存在的目标
pub(crate) async fn probe_first(
    env: &dyn Environment,
    targets: &[Target],
) -> Result<Option<ElementHandle>, LoopError> {
    for target in targets {
        if let Some(handle) = probe(env, *target).await? {
            return Ok(Some(handle));
        }
    }
    Ok(None)
}

/// 一次「查找并点击」的结果
pub(crate) enum Attempt {
    Clicked(ElementHandle),
    ClickFailed(ElementHandle),
    Missing,
}

/// 找到第一个可见目标并点击它（每轮最多调用一次）
pub(crate) async fn attempt(
    env: &dyn Environment,
    targets: &[Target],
) -> Result<Attempt, LoopError> {
    let Some(handle) = probe_first(env, targets).await? else {
        return Ok(Attempt::Missing);
    };
    if env.click(&handle).await {
        Ok(Attempt::Clicked(handle))
    } else {
        Ok(Attempt::ClickFailed(handle))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::*;
    use crate::env::ScriptedEnvironment;
    use crate::timing::{ManualClock, PacingProfile};

    /// Flow 单元测试用的上下文载体
    pub struct Harness {
        pub env: Arc<ScriptedEnvironment>,
        pub session: SessionState,
        pub pacing: Pacing,
        pub events: EventBus,
        pub flags: FlowFlags,
        pub clock: Arc<ManualClock>,
    }

    impl Harness {
        pub fn new(location: &str) -> Self {
            let clock = Arc::new(ManualClock::new(1_000));
            Self {
                env: Arc::new(ScriptedEnvironment::new(location)),
                session: SessionState::default(),
                pacing: Pacing::new(PacingProfile::Balanced, clock.clone(), Some(9)),
                events: EventBus::new(),
                flags: FlowFlags::default(),
                clock,
            }
        }

        pub fn cx(&mut self) -> TickContext<'_> {
            TickContext {
                env: self.env.as_ref(),
                session: &mut self.session,
                pacing: &mut self.pacing,
                events: &self.events,
                flags: self.flags,
                now_ms: crate::timing::Clock::now_ms(self.clock.as_ref()),
            }
        }
    }
}
