//! 单次运行的上下文与 tick 逻辑
//!
//! RunContext 独占本次运行的 SessionState / Pacing / 各 Flow 状态，热路径上无锁。
//! 外部统计以 StatsPatch 消息送达，在每轮 tick 开始时合并。

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch};

use crate::config::LoopSettings;
use crate::core::{LoopError, RecoveryAction, RecoveryEngine, SessionState, StatsPatch};
use crate::env::{Environment, InterruptDetector};
use crate::events::{AlertKind, EventBus};
use crate::flows::{
    BattleFlow, BattlePhase, BurstChange, BurstGate, CombatFlow, Flow, FlowKind, FlowStep,
    QuestFlow, TickContext, TravelFlow,
};
use crate::timing::{ActivityClass, Clock, Pacing, SystemClock, ThrottleSnapshot, TuneOptions};

/// 一轮 tick 的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Reschedule(Duration),
    /// 会话级中断：不再调度
    Halt,
}

pub struct RunContext {
    env: Arc<dyn Environment>,
    settings: LoopSettings,
    session: SessionState,
    pacing: Pacing,
    clock: Arc<dyn Clock>,
    events: EventBus,
    detector: InterruptDetector,
    recovery: RecoveryEngine,
    battle: BattleFlow,
    combat: CombatFlow,
    quest: QuestFlow,
    travel: TravelFlow,
    energy_gate: BurstGate,
    quest_gate: BurstGate,
    last_flow: Option<FlowKind>,
    rng: StdRng,
    patches: Option<mpsc::UnboundedReceiver<StatsPatch>>,
    session_tx: Option<Arc<watch::Sender<SessionState>>>,
}

impl RunContext {
    pub fn new(
        env: Arc<dyn Environment>,
        settings: LoopSettings,
        session: SessionState,
        events: EventBus,
    ) -> Self {
        Self::with_clock(env, settings, session, events, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        env: Arc<dyn Environment>,
        settings: LoopSettings,
        session: SessionState,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let seed = settings.pacing.seed;
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s.wrapping_add(2)),
            None => StdRng::from_entropy(),
        };
        Self {
            pacing: Pacing::new(settings.pacing.profile, clock.clone(), seed),
            recovery: RecoveryEngine::new(Duration::from_millis(settings.scheduler.recovery_delay_ms)),
            battle: BattleFlow::new(&settings.battle),
            combat: CombatFlow::new(),
            quest: QuestFlow::new(&settings.quests),
            travel: TravelFlow::new(&settings.travel),
            detector: InterruptDetector::new(),
            energy_gate: BurstGate::new(),
            quest_gate: BurstGate::new(),
            last_flow: None,
            patches: None,
            session_tx: None,
            env,
            settings,
            session,
            clock,
            events,
            rng,
        }
    }

    /// 外部统计通道（由 Orchestrator 接上）
    pub fn with_patches(mut self, rx: mpsc::UnboundedReceiver<StatsPatch>) -> Self {
        self.patches = Some(rx);
        self
    }

    /// 每轮结束后发布会话快照
    pub fn with_session_tx(mut self, tx: Arc<watch::Sender<SessionState>>) -> Self {
        self.session_tx = Some(tx);
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn battle_phase(&self) -> BattlePhase {
        self.battle.phase()
    }

    pub fn is_bursting(&self, kind: FlowKind) -> bool {
        match kind {
            FlowKind::Battle => self.energy_gate.is_bursting(),
            FlowKind::Quest => self.quest_gate.is_bursting(),
            FlowKind::Combat | FlowKind::Travel => false,
        }
    }

    pub fn last_flow(&self) -> Option<FlowKind> {
        self.last_flow
    }

    pub fn throttle_snapshot(&mut self, class: ActivityClass) -> ThrottleSnapshot {
        self.pacing.throttle.snapshot(class)
    }

    /// 直接合并一次统计更新（同步调用方使用；运行中请走通道）
    pub fn apply_stats(&mut self, patch: &StatsPatch) {
        self.session.apply(patch);
        self.events.stats(&self.session);
    }

    /// 发布当前会话快照（未接 watch 通道时无操作）
    pub fn publish_session(&self) {
        if let Some(tx) = &self.session_tx {
            tx.send_replace(self.session.clone());
        }
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.settings.scheduler.recovery_delay_ms)
    }

    fn drain_patches(&mut self) {
        let mut merged = false;
        if let Some(rx) = self.patches.as_mut() {
            while let Ok(patch) = rx.try_recv() {
                self.session.apply(&patch);
                merged = true;
            }
        }
        if merged {
            self.events.stats(&self.session);
        }
    }

    pub async fn tick(&mut self) -> TickOutcome {
        self.drain_patches();

        let outcome = match self.try_tick().await {
            Ok(outcome) => outcome,
            Err(err) => match self.recovery.handle(&err) {
                RecoveryAction::RetryAfter(delay) => {
                    self.events.log(format!("Loop error: {err}"));
                    TickOutcome::Reschedule(delay)
                }
                RecoveryAction::Halt(message) => {
                    self.events
                        .log("CAPTCHA / anti-bot detected -> bot was stopped (solve this manually)");
                    self.events.alert(AlertKind::Captcha, message);
                    TickOutcome::Halt
                }
            },
        };

        self.publish_session();
        outcome
    }

    async fn try_tick(&mut self) -> Result<TickOutcome, LoopError> {
        if let Some(interrupt) = self.detector.check(self.env.as_ref()).await {
            return Err(LoopError::SuppressionDetected(interrupt.message));
        }

        if self.env.detect_throttle_warning().await {
            let class = self.last_flow.unwrap_or(FlowKind::Travel).throttle_class();
            let seconds = self.pacing.throttle.mark_warning(class);
            self.events.log(format!(
                "Adaptive throttle [{class}]: too fast warning, slowing down ~{seconds}s"
            ));
        }

        if self.settings.flags.battle_energy {
            self.update_energy_gate();
            if self.energy_gate.is_bursting() {
                let step = self.run_flow(FlowKind::Battle).await?;
                if step.is_actionable() {
                    return Ok(self.schedule(FlowKind::Battle, step));
                }
            }
        }

        let priority = self.settings.scheduler.priority.clone();
        for kind in priority {
            if !self.is_enabled(kind) {
                continue;
            }
            if kind == FlowKind::Quest {
                self.update_quest_gate();
                if !self.quest_gate.is_bursting() {
                    continue;
                }
            }
            let step = self.run_flow(kind).await?;
            if step.is_actionable() {
                return Ok(self.schedule(kind, step));
            }
        }

        let scheduler = &self.settings.scheduler;
        let (min, max) = (scheduler.idle_min_ms, scheduler.idle_max_ms.max(scheduler.idle_min_ms));
        let idle = self.rng.gen_range(min..=max);
        tracing::debug!(idle_ms = idle, "nothing actionable, idling");
        Ok(TickOutcome::Reschedule(Duration::from_millis(idle)))
    }

    /// battle 只经由体力爆发门调度，不参与优先级链
    fn is_enabled(&self, kind: FlowKind) -> bool {
        match kind {
            FlowKind::Battle => false,
            FlowKind::Combat => self.settings.flags.combat,
            FlowKind::Quest => self.settings.flags.quests,
            FlowKind::Travel => true,
        }
    }

    fn update_energy_gate(&mut self) {
        let energy = self.session.energy();
        match self.energy_gate.update(energy) {
            BurstChange::Started => {
                self.battle.reset();
                self.events.log(format!(
                    "Battle burst started at full energy ({}/{})",
                    energy.current, energy.max
                ));
            }
            BurstChange::Finished => {
                self.battle.reset();
                self.events
                    .log("Battle burst finished: energy depleted, waiting for full refill");
            }
            BurstChange::Unchanged => {}
        }
    }

    fn update_quest_gate(&mut self) {
        let points = self.session.quest_points();
        match self.quest_gate.update(points) {
            BurstChange::Started => {
                self.quest.reset();
                self.events.log(format!(
                    "Quest burst started at full quest points ({}/{})",
                    points.current, points.max
                ));
            }
            BurstChange::Finished => {
                self.quest.reset();
                self.events.log("Quest burst finished: quest points depleted");
            }
            BurstChange::Unchanged => {}
        }
    }

    async fn run_flow(&mut self, kind: FlowKind) -> Result<FlowStep, LoopError> {
        let Self {
            env,
            session,
            pacing,
            events,
            settings,
            clock,
            battle,
            combat,
            quest,
            travel,
            ..
        } = self;

        let mut cx = TickContext {
            env: env.as_ref(),
            session,
            pacing,
            events,
            flags: settings.flags,
            now_ms: clock.now_ms(),
        };
        let flow: &mut dyn Flow = match kind {
            FlowKind::Battle => battle,
            FlowKind::Combat => combat,
            FlowKind::Quest => quest,
            FlowKind::Travel => travel,
        };
        tracing::trace!(flow = %flow.kind(), phase = flow.phase_name(), "advance");
        flow.advance(&mut cx).await
    }

    fn schedule(&mut self, kind: FlowKind, step: FlowStep) -> TickOutcome {
        self.last_flow = Some(kind);
        let class = kind.throttle_class();
        if step.progress {
            self.pacing.throttle.mark_progress(class);
        }
        if let Some(t) = step.transition {
            tracing::debug!(flow = kind.as_str(), from = t.from, to = t.to, "phase transition");
        }
        let tuned = self
            .pacing
            .throttle
            .tune_delay(class, step.delay_ms, TuneOptions::default());
        let delay = tuned.max(self.settings.scheduler.min_tick_ms);
        TickOutcome::Reschedule(Duration::from_millis(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowFlags;
    use crate::env::{EnvError, ScriptedEnvironment, Target};
    use crate::timing::ManualClock;

    const TRAVEL: &str = "https://game.test/travel";

    fn context(env: Arc<ScriptedEnvironment>, flags: FlowFlags) -> RunContext {
        let mut settings = LoopSettings::default().with_flags(flags);
        settings.pacing.seed = Some(7);
        RunContext::with_clock(
            env,
            settings,
            SessionState::default(),
            EventBus::new(),
            Arc::new(ManualClock::new(0)),
        )
    }

    fn millis(outcome: TickOutcome) -> u64 {
        match outcome {
            TickOutcome::Reschedule(d) => d.as_millis() as u64,
            TickOutcome::Halt => panic!("unexpected halt"),
        }
    }

    #[tokio::test]
    async fn test_idle_when_nothing_actionable() {
        let env = Arc::new(ScriptedEnvironment::new(TRAVEL));
        let mut ctx = context(env, FlowFlags::default());
        let ms = millis(ctx.tick().await);
        assert!((6_000..=9_000).contains(&ms));
        assert_eq!(ctx.last_flow(), None);
    }

    #[tokio::test]
    async fn test_combat_beats_travel() {
        let env = Arc::new(ScriptedEnvironment::new(TRAVEL));
        env.set_visible(&[Target::Attack, Target::TakeStep]);
        let flags = FlowFlags {
            combat: true,
            ..FlowFlags::default()
        };
        let mut ctx = context(env.clone(), flags);
        let ms = millis(ctx.tick().await);
        assert!(ms >= 500);
        assert_eq!(env.clicks(), vec![Target::Attack]);
        assert_eq!(ctx.last_flow(), Some(FlowKind::Combat));
    }

    #[tokio::test]
    async fn test_priority_is_configurable() {
        let env = Arc::new(ScriptedEnvironment::new(TRAVEL));
        env.set_visible(&[Target::Attack, Target::TakeStep]);
        let mut settings = LoopSettings::default().with_flags(FlowFlags {
            combat: true,
            ..FlowFlags::default()
        });
        settings.scheduler.priority = vec![FlowKind::Travel, FlowKind::Combat];
        let mut ctx = RunContext::with_clock(
            env.clone(),
            settings,
            SessionState::default(),
            EventBus::new(),
            Arc::new(ManualClock::new(0)),
        );
        ctx.tick().await;
        assert_eq!(env.clicks(), vec![Target::TakeStep]);
    }

    #[tokio::test]
    async fn test_disconnect_retries_after_recovery_delay() {
        let env = Arc::new(ScriptedEnvironment::new(TRAVEL));
        env.set_probe_error(Some(EnvError::Disconnected("browser gone".into())));
        let mut ctx = context(env, FlowFlags::default());
        assert_eq!(ctx.tick().await, TickOutcome::Reschedule(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_suppression_halts() {
        let env = Arc::new(ScriptedEnvironment::new(TRAVEL));
        env.set_suppression(true);
        env.show(Target::TakeStep);
        let mut ctx = context(env.clone(), FlowFlags::default());
        assert_eq!(ctx.tick().await, TickOutcome::Halt);
        assert!(env.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_throttle_warning_marks_last_flow_class() {
        let env = Arc::new(ScriptedEnvironment::new(TRAVEL));
        env.show(Target::TakeStep);
        let mut ctx = context(env.clone(), FlowFlags::default());
        ctx.tick().await;
        env.set_throttle_warning(true);
        ctx.tick().await;
        let snapshot = ctx.throttle_snapshot(ActivityClass::Gather);
        assert_eq!(snapshot.warnings, 1);
        assert!(snapshot.penalty > 0.0);
    }

    #[tokio::test]
    async fn test_patches_are_drained_before_tick() {
        let env = Arc::new(ScriptedEnvironment::new(TRAVEL));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut ctx = context(env, FlowFlags::default()).with_patches(rx);
        tx.send(StatsPatch::energy(4, 10)).unwrap();
        ctx.tick().await;
        assert_eq!(ctx.session().energy, 4);
        assert_eq!(ctx.session().max_energy, 10);
    }
}
