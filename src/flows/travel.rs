//! 旅行 Flow：走一步，或（开启采集时）点开资源并在弹窗中执行采集
//!
//! 页面上既无资源也无「走一步」按钮时返回 0，交由编排器的空闲等待。

use async_trait::async_trait;

use crate::config::TravelSection;
use crate::core::LoopError;
use crate::env::Target;
use crate::flows::{
    attempt, Attempt, DomainGuard, DomainStatus, Flow, FlowKind, FlowStep, MissPolicy, Phase,
    PhaseTracker, TickContext,
};
use crate::timing::{ActivityKind, DelayContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TravelPhase {
    Walk,
    GatherPopup,
}

impl Phase for TravelPhase {
    fn name(&self) -> &'static str {
        match self {
            Self::Walk => "walk",
            Self::GatherPopup => "gather_popup",
        }
    }

    fn miss_policy(&self) -> Option<MissPolicy<Self>> {
        match self {
            Self::Walk => None,
            Self::GatherPopup => Some(MissPolicy {
                threshold: 3,
                fallback: Self::Walk,
                log_every: 1,
            }),
        }
    }
}

pub struct TravelFlow {
    tracker: PhaseTracker<TravelPhase>,
    guard: DomainGuard,
}

impl TravelFlow {
    pub fn new(section: &TravelSection) -> Self {
        Self {
            tracker: PhaseTracker::new(TravelPhase::Walk),
            guard: DomainGuard::new(section.domain()),
        }
    }

    pub fn phase(&self) -> TravelPhase {
        self.tracker.phase()
    }

    async fn walk(&mut self, cx: &mut TickContext<'_>) -> Result<FlowStep, LoopError> {
        let targets: &[Target] = if cx.flags.resources {
            &[Target::GatherResource, Target::TakeStep]
        } else {
            &[Target::TakeStep]
        };

        match attempt(cx.env, targets).await? {
            Attempt::Clicked(handle) if handle.target == Target::GatherResource => {
                cx.log(format!("Resource button found: \"{}\" -> clicked", handle.text));
                let transition = self.tracker.advance(TravelPhase::GatherPopup);
                let delay = cx.delay(ActivityKind::Resource, 2000, 5000, DelayContext::after_resource());
                Ok(FlowStep::moved(delay, transition))
            }
            Attempt::Clicked(_) => {
                cx.session.record_step();
                cx.publish_stats();
                cx.log(format!("Step taken! Total: {}", cx.session.steps));
                let delay = cx.delay(ActivityKind::Step, 3800, 6000, DelayContext::default());
                Ok(FlowStep::acted(delay))
            }
            Attempt::ClickFailed(handle) => {
                cx.log(format!("{} click failed -> waiting", handle.target));
                let delay = cx.delay(ActivityKind::Step, 1500, 4000, DelayContext::default());
                Ok(FlowStep::wait(delay))
            }
            Attempt::Missing => {
                tracing::debug!("No step or resource button found");
                Ok(FlowStep::idle())
            }
        }
    }

    async fn gather(&mut self, cx: &mut TickContext<'_>) -> Result<FlowStep, LoopError> {
        match attempt(cx.env, &[Target::GatherAction]).await? {
            Attempt::Clicked(handle) => {
                cx.session.record_item();
                cx.publish_stats();
                cx.log(format!("Popup action performed: {}", handle.text));
                let transition = self.tracker.advance(TravelPhase::Walk);
                let delay = cx.delay(ActivityKind::Resource, 5000, 10000, DelayContext::after_resource());
                Ok(FlowStep::moved(delay, transition))
            }
            Attempt::ClickFailed(_) | Attempt::Missing => {
                let outcome = self.tracker.miss();
                if outcome.should_log {
                    cx.log(format!("No action button found in popup (miss {})", outcome.misses));
                }
                if outcome.regressed.is_some() {
                    cx.log("Gather popup never opened, back to walking");
                }
                let delay = cx.delay(ActivityKind::Popup, 1500, 2500, DelayContext::default());
                Ok(FlowStep::wait(delay).with_transition(outcome.regressed))
            }
        }
    }
}

#[async_trait]
impl Flow for TravelFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::Travel
    }

    fn phase_name(&self) -> &'static str {
        self.tracker.phase().name()
    }

    async fn advance(&mut self, cx: &mut TickContext<'_>) -> Result<FlowStep, LoopError> {
        let location = cx.env.current_location().await;
        match self.guard.observe(&location, cx.now_ms) {
            DomainStatus::Inside => {}
            DomainStatus::Waiting => {
                let delay = cx.delay(ActivityKind::Step, 1200, 2000, DelayContext::default().quick());
                return Ok(FlowStep::wait(delay));
            }
            DomainStatus::Expired => {
                let transition = self.tracker.advance(TravelPhase::Walk);
                let delay = self
                    .guard
                    .recover(cx, ActivityKind::Step, "Not on travel page -> navigating")
                    .await;
                return Ok(FlowStep::wait(delay).with_transition(Some(transition)));
            }
        }

        match self.tracker.phase() {
            TravelPhase::Walk => self.walk(cx).await,
            TravelPhase::GatherPopup => self.gather(cx).await,
        }
    }

    fn reset(&mut self) {
        self.tracker = PhaseTracker::new(TravelPhase::Walk);
        self.guard.reset();
    }
}
