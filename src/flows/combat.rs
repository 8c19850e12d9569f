//! 遭遇战 Flow：页面出现攻击或确认按钮就点，否则让出本轮

use async_trait::async_trait;

use crate::core::LoopError;
use crate::env::Target;
use crate::flows::{attempt, Attempt, Flow, FlowKind, FlowStep, TickContext};
use crate::timing::{ActivityKind, DelayContext};

#[derive(Debug, Default)]
pub struct CombatFlow;

impl CombatFlow {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Flow for CombatFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::Combat
    }

    fn phase_name(&self) -> &'static str {
        "engage"
    }

    async fn advance(&mut self, cx: &mut TickContext<'_>) -> Result<FlowStep, LoopError> {
        let step = match attempt(cx.env, &[Target::Attack, Target::Continue]).await? {
            Attempt::Clicked(handle) if handle.target == Target::Attack => {
                cx.log("Attack button found and clicked");
                FlowStep::acted(cx.delay(ActivityKind::Combat, 2000, 3500, DelayContext::after_combat()))
            }
            Attempt::Clicked(_) => {
                cx.log("Confirmation clicked");
                FlowStep::acted(cx.delay(ActivityKind::Combat, 2500, 3500, DelayContext::after_combat()))
            }
            Attempt::ClickFailed(handle) => {
                cx.log(format!("Combat: {} click failed", handle.target));
                FlowStep::wait(cx.delay(ActivityKind::Combat, 3000, 4500, DelayContext::default()))
            }
            Attempt::Missing => FlowStep::idle(),
        };
        Ok(step)
    }

    fn reset(&mut self) {}
}
