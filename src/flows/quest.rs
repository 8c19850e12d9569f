//! 任务 Flow：任务板选卡 → 执行
//!
//! 执行成功消耗 1 点任务点并回到任务板；执行按钮连续缺失 6 次则重新选卡。

use async_trait::async_trait;

use crate::config::QuestSection;
use crate::core::LoopError;
use crate::env::Target;
use crate::flows::{
    attempt, Attempt, DomainGuard, DomainStatus, Flow, FlowKind, FlowStep, MissPolicy, Phase,
    PhaseTracker, TickContext,
};
use crate::timing::{ActivityKind, DelayContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestPhase {
    Board,
    Perform,
}

impl Phase for QuestPhase {
    fn name(&self) -> &'static str {
        match self {
            Self::Board => "board",
            Self::Perform => "perform",
        }
    }

    fn miss_policy(&self) -> Option<MissPolicy<Self>> {
        match self {
            Self::Board => None,
            Self::Perform => Some(MissPolicy {
                threshold: 6,
                fallback: Self::Board,
                log_every: 2,
            }),
        }
    }
}

pub struct QuestFlow {
    tracker: PhaseTracker<QuestPhase>,
    guard: DomainGuard,
}

impl QuestFlow {
    pub fn new(section: &QuestSection) -> Self {
        Self {
            tracker: PhaseTracker::new(QuestPhase::Board),
            guard: DomainGuard::new(section.domain()),
        }
    }

    pub fn phase(&self) -> QuestPhase {
        self.tracker.phase()
    }

    fn miss(&mut self, cx: &mut TickContext<'_>, what: &str) -> FlowStep {
        let outcome = self.tracker.miss();
        if outcome.should_log {
            cx.log(format!("{what} (miss {})", outcome.misses));
        }
        if outcome.regressed.is_some() {
            cx.log("Quest burst: perform button never appeared, picking another quest");
        }
        FlowStep::wait(cx.delay(ActivityKind::Quest, 2000, 3200, DelayContext::default()))
            .with_transition(outcome.regressed)
    }

    async fn board(&mut self, cx: &mut TickContext<'_>) -> Result<FlowStep, LoopError> {
        match attempt(cx.env, &[Target::QuestCard]).await? {
            Attempt::Clicked(card) => {
                cx.log(format!("Quest pick: {}", card.text));
                let transition = self.tracker.advance(QuestPhase::Perform);
                let delay = cx.delay(ActivityKind::Quest, 1200, 2200, DelayContext::default().quick());
                Ok(FlowStep::moved(delay, transition))
            }
            Attempt::ClickFailed(_) => Ok(self.miss(cx, "Quest burst: quest card click failed")),
            Attempt::Missing => Ok(self.miss(
                cx,
                "Quest burst: unable to pick a quest (no quest cards found)",
            )),
        }
    }

    async fn perform(&mut self, cx: &mut TickContext<'_>) -> Result<FlowStep, LoopError> {
        match attempt(cx.env, &[Target::QuestPerform]).await? {
            Attempt::Clicked(_) => {
                cx.session.consume_quest_point();
                cx.publish_stats();
                cx.log("Quest action: Perform clicked");
                let transition = self.tracker.advance(QuestPhase::Board);
                let delay = cx.delay(ActivityKind::Quest, 2800, 4500, DelayContext::default());
                Ok(FlowStep::moved(delay, transition))
            }
            Attempt::ClickFailed(_) => Ok(self.miss(cx, "Quest burst: perform click failed")),
            Attempt::Missing => Ok(self.miss(
                cx,
                "Quest burst: no perform button found, retrying shortly",
            )),
        }
    }
}

#[async_trait]
impl Flow for QuestFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::Quest
    }

    fn phase_name(&self) -> &'static str {
        self.tracker.phase().name()
    }

    async fn advance(&mut self, cx: &mut TickContext<'_>) -> Result<FlowStep, LoopError> {
        let location = cx.env.current_location().await;
        match self.guard.observe(&location, cx.now_ms) {
            DomainStatus::Inside => {}
            DomainStatus::Waiting => {
                let delay = cx.delay(ActivityKind::Quest, 1200, 2000, DelayContext::default().quick());
                return Ok(FlowStep::wait(delay));
            }
            DomainStatus::Expired => {
                let transition = self.tracker.advance(QuestPhase::Board);
                let delay = self
                    .guard
                    .recover(cx, ActivityKind::Quest, "Quest burst active: opening quest board")
                    .await;
                return Ok(FlowStep::wait(delay).with_transition(Some(transition)));
            }
        }

        match self.tracker.phase() {
            QuestPhase::Board => self.board(cx).await,
            QuestPhase::Perform => self.perform(cx).await,
        }
    }

    fn reset(&mut self) {
        self.tracker = PhaseTracker::new(QuestPhase::Board);
        self.guard.reset();
    }
}
