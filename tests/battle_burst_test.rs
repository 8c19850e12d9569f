//! 体力爆发场景：满体力进入连战，一次完整的生成 + 战斗循环扣 1 点，耗尽后直到再次满值才重启

use std::sync::Arc;

use stride::config::FlowFlags;
use stride::core::{RunContext, StatsPatch, TickOutcome};
use stride::env::{Reaction, ScriptedEnvironment, Target};
use stride::flows::{BattlePhase, FlowKind};
use stride::timing::ManualClock;
use stride::{EventBus, LoopSettings, SessionState};

const ARENA: &str = "https://game.test/battle/arena?new_page=true";

fn arena() -> Arc<ScriptedEnvironment> {
    let env = Arc::new(ScriptedEnvironment::new(ARENA));
    env.show(Target::GenerateEnemy);
    env.on_click(
        Target::GenerateEnemy,
        Reaction::new()
            .hide(Target::GenerateEnemy)
            .show(Target::GenerateConfirm),
    );
    env.on_click(
        Target::GenerateConfirm,
        Reaction::new()
            .hide(Target::GenerateConfirm)
            .show(Target::BattleEnter),
    );
    env.on_click(
        Target::BattleEnter,
        Reaction::new().hide(Target::BattleEnter).show(Target::Attack),
    );
    env
}

fn context(env: Arc<ScriptedEnvironment>) -> RunContext {
    let mut settings = LoopSettings::default().with_flags(FlowFlags {
        battle_energy: true,
        ..FlowFlags::default()
    });
    settings.pacing.seed = Some(3);
    RunContext::with_clock(
        env,
        settings,
        SessionState::default(),
        EventBus::new(),
        Arc::new(ManualClock::new(0)),
    )
}

#[tokio::test]
async fn test_energy_burst_lifecycle() {
    let env = arena();
    let mut ctx = context(env.clone());
    ctx.apply_stats(&StatsPatch::energy(10, 10));

    // Menu → GenerateConfirm → BattleEnter → Fight
    for _ in 0..3 {
        assert!(matches!(ctx.tick().await, TickOutcome::Reschedule(_)));
    }
    assert!(ctx.is_bursting(FlowKind::Battle));
    assert_eq!(ctx.battle_phase(), BattlePhase::Fight);
    assert_eq!(ctx.session().energy, 9);
    assert_eq!(
        env.clicks(),
        vec![Target::GenerateEnemy, Target::GenerateConfirm, Target::BattleEnter]
    );

    ctx.apply_stats(&StatsPatch::energy(0, 10));
    ctx.tick().await;
    assert!(!ctx.is_bursting(FlowKind::Battle));
    assert_eq!(ctx.battle_phase(), BattlePhase::Menu);

    ctx.apply_stats(&StatsPatch::energy(9, 10));
    ctx.tick().await;
    assert!(!ctx.is_bursting(FlowKind::Battle));

    ctx.apply_stats(&StatsPatch::energy(10, 10));
    ctx.tick().await;
    assert!(ctx.is_bursting(FlowKind::Battle));
}

#[tokio::test]
async fn test_unknown_max_never_starts_burst() {
    let env = arena();
    let mut ctx = context(env.clone());
    ctx.apply_stats(&StatsPatch::energy(10, 0));
    ctx.tick().await;
    assert!(!ctx.is_bursting(FlowKind::Battle));
    assert!(env.clicks().is_empty());
}

#[tokio::test]
async fn test_reschedule_respects_min_tick() {
    let env = arena();
    let mut ctx = context(env);
    ctx.apply_stats(&StatsPatch::energy(10, 10));
    for _ in 0..5 {
        match ctx.tick().await {
            TickOutcome::Reschedule(d) => assert!(d.as_millis() >= 500),
            TickOutcome::Halt => panic!("unexpected halt"),
        }
    }
}
