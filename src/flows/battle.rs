//! 竞技场连战 Flow
//!
//! 阶段：Menu → GenerateOpen → GenerateConfirm → BattleEnter → Fight → Menu。
//! 每轮只点击一次；确认生成对手（GenerateConfirm → BattleEnter）时扣 1 点体力。
//! Menu 从不因 miss 退回；其他阶段连续 miss 达到阈值后退回上游。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BattleSection;
use crate::core::LoopError;
use crate::env::{ElementHandle, Target};
use crate::flows::{
    attempt, Attempt, DomainGuard, DomainStatus, Flow, FlowKind, FlowStep, MissPolicy, Phase,
    PhaseTracker, TickContext,
};
use crate::timing::{ActivityKind, DelayContext};

/// 战斗中多个动作同时可见时的优先顺序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FightPriority {
    #[default]
    AttackFirst,
    GenerateFirst,
}

impl FightPriority {
    fn order(&self) -> &'static [Target] {
        match self {
            Self::AttackFirst => &[
                Target::Attack,
                Target::BattleEnter,
                Target::GenerateEnemy,
                Target::Leave,
                Target::Continue,
            ],
            Self::GenerateFirst => &[
                Target::GenerateEnemy,
                Target::Attack,
                Target::BattleEnter,
                Target::Leave,
                Target::Continue,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattlePhase {
    Menu,
    GenerateOpen,
    GenerateConfirm,
    BattleEnter,
    Fight,
}

impl BattlePhase {
    fn retry_message(&self) -> &'static str {
        match self {
            Self::Menu => "Battle burst: staying on the menu",
            Self::GenerateOpen => "Battle burst: retrying from Battle NPCs",
            Self::GenerateConfirm => "Battle burst: retrying Generate Enemy step",
            Self::BattleEnter => "Battle burst: retrying from Generate Enemy step",
            Self::Fight => "Battle burst: fight stalled, restarting NPC cycle",
        }
    }

    fn missing_message(&self) -> &'static str {
        match self {
            Self::Menu => "Battle burst: no Battle NPCs / Generate Enemy button found",
            Self::GenerateOpen => "Battle burst: Generate Enemy not found yet",
            Self::GenerateConfirm => "Battle burst: waiting for Generate confirmation",
            Self::BattleEnter => "Battle burst: waiting for Battle button",
            Self::Fight => "Battle burst: waiting for attack state",
        }
    }

    /// 未找到目标时的基础等待区间
    fn wait_range(&self) -> (u64, u64) {
        match self {
            Self::Menu => (2200, 3400),
            Self::GenerateOpen => (2400, 3800),
            Self::GenerateConfirm => (2300, 3600),
            Self::BattleEnter | Self::Fight => (2200, 3600),
        }
    }
}

impl Phase for BattlePhase {
    fn name(&self) -> &'static str {
        match self {
            Self::Menu => "menu",
            Self::GenerateOpen => "generate_open",
            Self::GenerateConfirm => "generate_confirm",
            Self::BattleEnter => "battle_enter",
            Self::Fight => "fight",
        }
    }

    fn miss_policy(&self) -> Option<MissPolicy<Self>> {
        let (threshold, fallback, log_every) = match self {
            Self::Menu => return None,
            Self::GenerateOpen => (8, Self::Menu, 2),
            Self::GenerateConfirm => (10, Self::GenerateOpen, 2),
            Self::BattleEnter => (8, Self::GenerateOpen, 2),
            Self::Fight => (14, Self::Menu, 4),
        };
        Some(MissPolicy {
            threshold,
            fallback,
            log_every,
        })
    }
}

pub struct BattleFlow {
    tracker: PhaseTracker<BattlePhase>,
    guard: DomainGuard,
    fight_priority: FightPriority,
}

impl BattleFlow {
    pub fn new(section: &BattleSection) -> Self {
        Self {
            tracker: PhaseTracker::new(BattlePhase::Menu),
            guard: DomainGuard::new(section.domain()),
            fight_priority: section.fight_priority,
        }
    }

    pub fn phase(&self) -> BattlePhase {
        self.tracker.phase()
    }

    pub fn misses(&self) -> u32 {
        self.tracker.misses()
    }

    fn miss(&mut self, cx: &mut TickContext<'_>, what: &str) -> FlowStep {
        let phase = self.tracker.phase();
        let outcome = self.tracker.miss();
        if outcome.should_log {
            cx.log(format!("{what} (miss {})", outcome.misses));
        }
        if outcome.regressed.is_some() {
            cx.log(phase.retry_message());
        }
        let (min, max) = phase.wait_range();
        FlowStep::wait(cx.delay(ActivityKind::Combat, min, max, DelayContext::default()))
            .with_transition(outcome.regressed)
    }

    fn click_failed(&mut self, cx: &mut TickContext<'_>, handle: &ElementHandle) -> FlowStep {
        let phase = self.tracker.phase();
        let outcome = self.tracker.miss();
        if outcome.should_log {
            cx.log(format!(
                "Battle burst: {} click failed (miss {})",
                handle.target, outcome.misses
            ));
        }
        if outcome.regressed.is_some() {
            cx.log(phase.retry_message());
        }
        FlowStep::wait(cx.delay(ActivityKind::Combat, 2400, 3800, DelayContext::default()))
            .with_transition(outcome.regressed)
    }

    async fn menu(&mut self, cx: &mut TickContext<'_>) -> Result<FlowStep, LoopError> {
        let handle = match attempt(cx.env, &[Target::BattleNpcs, Target::GenerateEnemy]).await? {
            Attempt::Clicked(handle) => handle,
            Attempt::ClickFailed(handle) => return Ok(self.click_failed(cx, &handle)),
            Attempt::Missing => return Ok(self.miss(cx, BattlePhase::Menu.missing_message())),
        };

        let next = if handle.target == Target::BattleNpcs {
            cx.log("Battle burst: Battle NPCs clicked");
            BattlePhase::GenerateOpen
        } else {
            cx.log("Battle burst: Generate Enemy clicked from menu");
            BattlePhase::GenerateConfirm
        };
        let transition = self.tracker.advance(next);
        let delay = cx.delay(ActivityKind::Combat, 2200, 3400, DelayContext::after_combat());
        Ok(FlowStep::moved(delay, transition))
    }

    /// GenerateOpen / GenerateConfirm / BattleEnter：找到并点击单个目标即前进
    async fn single(
        &mut self,
        cx: &mut TickContext<'_>,
        target: Target,
        next: BattlePhase,
    ) -> Result<FlowStep, LoopError> {
        let phase = self.tracker.phase();
        let handle = match attempt(cx.env, &[target]).await? {
            Attempt::Clicked(handle) => handle,
            Attempt::ClickFailed(handle) => return Ok(self.click_failed(cx, &handle)),
            Attempt::Missing => return Ok(self.miss(cx, phase.missing_message())),
        };

        let (min, max) = match phase {
            BattlePhase::GenerateConfirm => {
                cx.session.consume_energy();
                cx.publish_stats();
                cx.log("Battle burst: Generate clicked -> waiting for Battle");
                (2200, 3600)
            }
            BattlePhase::BattleEnter => {
                cx.log("Battle burst: Battle clicked -> fighting");
                (2600, 4200)
            }
            _ => {
                cx.log(format!("Battle burst: {} clicked", handle.target));
                (2200, 3600)
            }
        };
        let transition = self.tracker.advance(next);
        let delay = cx.delay(ActivityKind::Combat, min, max, DelayContext::after_combat());
        Ok(FlowStep::moved(delay, transition))
    }

    async fn fight(&mut self, cx: &mut TickContext<'_>) -> Result<FlowStep, LoopError> {
        let handle = match attempt(cx.env, self.fight_priority.order()).await? {
            Attempt::Clicked(handle) => handle,
            Attempt::ClickFailed(handle) => return Ok(self.click_failed(cx, &handle)),
            Attempt::Missing => return Ok(self.miss(cx, BattlePhase::Fight.missing_message())),
        };

        let after = DelayContext::after_combat();
        let step = match handle.target {
            Target::Attack => {
                self.tracker.hold();
                cx.log("Battle burst: Attack clicked");
                FlowStep::acted(cx.delay(ActivityKind::Combat, 3000, 4600, after))
            }
            Target::BattleEnter => {
                self.tracker.hold();
                cx.log("Battle burst: Battle clicked (retry for attack state)");
                FlowStep::acted(cx.delay(ActivityKind::Combat, 2200, 3600, after))
            }
            Target::GenerateEnemy => {
                cx.log("Battle burst: Generate Enemy visible mid-fight -> generating next opponent");
                let transition = self.tracker.advance(BattlePhase::GenerateConfirm);
                FlowStep::moved(cx.delay(ActivityKind::Combat, 2200, 3600, after), transition)
            }
            Target::Leave => {
                cx.log("Battle burst: Leave/Close clicked, next NPC");
                let transition = self.tracker.advance(BattlePhase::Menu);
                FlowStep::moved(cx.delay(ActivityKind::Close, 1800, 3000, after), transition)
            }
            _ => {
                self.tracker.hold();
                cx.log("Battle burst: Continue clicked");
                FlowStep::acted(cx.delay(ActivityKind::Combat, 2600, 4200, after))
            }
        };
        Ok(step)
    }
}

#[async_trait]
impl Flow for BattleFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::Battle
    }

    fn phase_name(&self) -> &'static str {
        self.tracker.phase().name()
    }

    async fn advance(&mut self, cx: &mut TickContext<'_>) -> Result<FlowStep, LoopError> {
        let location = cx.env.current_location().await;
        match self.guard.observe(&location, cx.now_ms) {
            DomainStatus::Inside => {}
            DomainStatus::Waiting => {
                let delay = cx.delay(ActivityKind::Combat, 1200, 2000, DelayContext::default().quick());
                return Ok(FlowStep::wait(delay));
            }
            DomainStatus::Expired => {
                let transition = self.tracker.advance(BattlePhase::Menu);
                let delay = self
                    .guard
                    .recover(cx, ActivityKind::Combat, "Battle burst active: opening battle arena")
                    .await;
                return Ok(FlowStep::wait(delay).with_transition(Some(transition)));
            }
        }

        match self.tracker.phase() {
            BattlePhase::Menu => self.menu(cx).await,
            BattlePhase::GenerateOpen => {
                self.single(cx, Target::GenerateEnemy, BattlePhase::GenerateConfirm)
                    .await
            }
            BattlePhase::GenerateConfirm => {
                self.single(cx, Target::GenerateConfirm, BattlePhase::BattleEnter)
                    .await
            }
            BattlePhase::BattleEnter => self.single(cx, Target::BattleEnter, BattlePhase::Fight).await,
            BattlePhase::Fight => self.fight(cx).await,
        }
    }

    fn reset(&mut self) {
        self.tracker = PhaseTracker::new(BattlePhase::Menu);
        self.guard.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvError, Reaction};
    use crate::flows::testing::Harness;

    const ARENA: &str = "https://game.test/battle/arena";

    fn flow() -> BattleFlow {
        BattleFlow::new(&BattleSection::default())
    }

    #[tokio::test]
    async fn test_full_cycle_consumes_one_energy() {
        let mut h = Harness::new(ARENA);
        h.session.energy = 10;
        h.session.max_energy = 10;
        h.env.show(Target::BattleNpcs);
        h.env.on_click(
            Target::BattleNpcs,
            Reaction::new().hide(Target::BattleNpcs).show(Target::GenerateEnemy),
        );
        h.env.on_click(
            Target::GenerateEnemy,
            Reaction::new()
                .hide(Target::GenerateEnemy)
                .show(Target::GenerateConfirm),
        );
        h.env.on_click(
            Target::GenerateConfirm,
            Reaction::new()
                .hide(Target::GenerateConfirm)
                .show(Target::BattleEnter),
        );
        h.env.on_click(
            Target::BattleEnter,
            Reaction::new().hide(Target::BattleEnter).show(Target::Attack),
        );

        let mut flow = flow();
        let expected = [
            BattlePhase::GenerateOpen,
            BattlePhase::GenerateConfirm,
            BattlePhase::BattleEnter,
            BattlePhase::Fight,
        ];
        for phase in expected {
            let step = flow.advance(&mut h.cx()).await.unwrap();
            assert!(step.is_actionable());
            assert!(step.transition.is_some());
            assert_eq!(flow.phase(), phase);
        }
        assert_eq!(h.session.energy, 9);

        let step = flow.advance(&mut h.cx()).await.unwrap();
        assert!(step.transition.is_none());
        assert_eq!(flow.phase(), BattlePhase::Fight);
        assert_eq!(
            h.env.clicks(),
            vec![
                Target::BattleNpcs,
                Target::GenerateEnemy,
                Target::GenerateConfirm,
                Target::BattleEnter,
                Target::Attack,
            ]
        );
    }

    #[tokio::test]
    async fn test_generate_open_regresses_on_eighth_miss() {
        let mut h = Harness::new(ARENA);
        h.env.show(Target::BattleNpcs);
        h.env
            .on_click(Target::BattleNpcs, Reaction::new().hide(Target::BattleNpcs));

        let mut flow = flow();
        flow.advance(&mut h.cx()).await.unwrap();
        assert_eq!(flow.phase(), BattlePhase::GenerateOpen);

        for n in 1..8 {
            let step = flow.advance(&mut h.cx()).await.unwrap();
            assert!(step.transition.is_none());
            assert_eq!(flow.misses(), n);
        }
        let step = flow.advance(&mut h.cx()).await.unwrap();
        assert_eq!(flow.phase(), BattlePhase::Menu);
        assert_eq!(flow.misses(), 0);
        assert_eq!(step.transition.map(|t| t.to), Some("menu"));
    }

    #[tokio::test]
    async fn test_menu_never_regresses() {
        let mut h = Harness::new(ARENA);
        let mut flow = flow();
        for _ in 0..30 {
            let step = flow.advance(&mut h.cx()).await.unwrap();
            assert!(step.is_actionable());
            assert!(step.transition.is_none());
        }
        assert_eq!(flow.phase(), BattlePhase::Menu);
        assert!(h.env.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_one_click_per_tick() {
        let mut h = Harness::new(ARENA);
        h.env.set_visible(&[Target::BattleNpcs, Target::GenerateEnemy]);
        let mut flow = flow();
        flow.advance(&mut h.cx()).await.unwrap();
        assert_eq!(h.env.clicks(), vec![Target::BattleNpcs]);
    }

    #[tokio::test]
    async fn test_fight_priority_generate_first() {
        let mut h = Harness::new(ARENA);
        let section = BattleSection {
            fight_priority: FightPriority::GenerateFirst,
            ..BattleSection::default()
        };
        let mut flow = BattleFlow::new(&section);
        flow.tracker.advance(BattlePhase::Fight);
        h.env.set_visible(&[Target::Attack, Target::GenerateEnemy]);

        flow.advance(&mut h.cx()).await.unwrap();
        assert_eq!(h.env.clicks(), vec![Target::GenerateEnemy]);
        assert_eq!(flow.phase(), BattlePhase::GenerateConfirm);
    }

    #[tokio::test]
    async fn test_leave_returns_to_menu() {
        let mut h = Harness::new(ARENA);
        let mut flow = flow();
        flow.tracker.advance(BattlePhase::Fight);
        h.env.show(Target::Leave);
        flow.advance(&mut h.cx()).await.unwrap();
        assert_eq!(flow.phase(), BattlePhase::Menu);
    }

    #[tokio::test]
    async fn test_transient_probe_error_counts_as_miss() {
        let mut h = Harness::new(ARENA);
        let mut flow = flow();
        flow.tracker.advance(BattlePhase::GenerateOpen);
        h.env.set_probe_error(Some(EnvError::StaleHandle("gone".into())));
        let step = flow.advance(&mut h.cx()).await.unwrap();
        assert!(step.is_actionable());
        assert_eq!(flow.misses(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_propagates() {
        let mut h = Harness::new(ARENA);
        let mut flow = flow();
        h.env
            .set_probe_error(Some(EnvError::Disconnected("tab closed".into())));
        let err = flow.advance(&mut h.cx()).await.unwrap_err();
        assert!(matches!(err, LoopError::Environment(EnvError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_navigates_after_grace_window() {
        let mut h = Harness::new("https://game.test/travel");
        let mut flow = flow();
        flow.tracker.advance(BattlePhase::Fight);

        let step = flow.advance(&mut h.cx()).await.unwrap();
        assert!(step.is_actionable());
        assert!(h.env.navigations().is_empty());
        assert_eq!(flow.phase(), BattlePhase::Fight);

        h.clock.advance(3_000);
        let step = flow.advance(&mut h.cx()).await.unwrap();
        assert_eq!(h.env.navigations().len(), 1);
        assert_eq!(flow.phase(), BattlePhase::Menu);
        assert_eq!(step.transition.map(|t| (t.from, t.to)), Some(("fight", "menu")));
    }

    /// 空白页面上从 phase 连续 miss，第 threshold 次恰好退回 fallback
    async fn assert_falls_back(phase: BattlePhase, threshold: u32, fallback: BattlePhase) {
        let mut h = Harness::new(ARENA);
        let mut flow = flow();
        flow.tracker.advance(phase);

        for n in 1..threshold {
            let step = flow.advance(&mut h.cx()).await.unwrap();
            assert!(step.transition.is_none(), "{phase:?} fell back early at miss {n}");
            assert_eq!(flow.misses(), n);
        }
        let step = flow.advance(&mut h.cx()).await.unwrap();
        assert_eq!(flow.phase(), fallback);
        assert_eq!(flow.misses(), 0);
        assert_eq!(
            step.transition.map(|t| (t.from, t.to)),
            Some((phase.name(), fallback.name()))
        );
        assert!(h.env.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_generate_confirm_falls_back_on_tenth_miss() {
        assert_falls_back(BattlePhase::GenerateConfirm, 10, BattlePhase::GenerateOpen).await;
    }

    #[tokio::test]
    async fn test_battle_enter_falls_back_on_eighth_miss() {
        assert_falls_back(BattlePhase::BattleEnter, 8, BattlePhase::GenerateOpen).await;
    }

    #[tokio::test]
    async fn test_fight_falls_back_on_fourteenth_miss() {
        assert_falls_back(BattlePhase::Fight, 14, BattlePhase::Menu).await;
    }

    #[tokio::test]
    async fn test_fight_logs_every_fourth_miss() {
        let mut h = Harness::new(ARENA);
        let mut rx = h.events.subscribe();
        let mut flow = flow();
        flow.tracker.advance(BattlePhase::Fight);

        for _ in 0..13 {
            flow.advance(&mut h.cx()).await.unwrap();
        }
        assert_eq!(flow.phase(), BattlePhase::Fight);

        let mut logged = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let crate::events::LoopEvent::Log(record) = event {
                logged.push(record.message);
            }
        }
        assert_eq!(
            logged,
            [1, 5, 9, 13]
                .iter()
                .map(|n| format!("Battle burst: waiting for attack state (miss {n})"))
                .collect::<Vec<_>>()
        );
    }
}
