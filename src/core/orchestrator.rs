//! 编排器：单实例主循环
//!
//! 负责：保证同一时刻只有一个运行；启动后台任务按「sleep 或取消 → tick」循环驱动 RunContext，
//! 直到 stop、中断或外部关闭。状态通过 EventBus 广播，会话快照通过 watch 通道发布。
//!
//! stop 不打断进行中的 tick；新运行的后台任务会先等上一个任务退出，再发布快照、执行第一轮 tick。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::LoopSettings;
use crate::core::{RunContext, RunLock, SessionState, StatsPatch, TickOutcome};
use crate::env::Environment;
use crate::events::EventBus;

#[derive(Default)]
struct Slot {
    active: Option<RunLock>,
    /// 已释放、可能仍在执行最后一轮 tick 的后台任务
    draining: Option<JoinHandle<()>>,
}

impl Slot {
    /// 释放当前运行并记下其后台任务；返回释放前是否仍在运行
    fn release(&mut self) -> Option<bool> {
        let run = self.active.take()?;
        let was_running = run.is_running();
        tracing::info!(run_id = %run.run_id(), "releasing run");
        if let Some(task) = run.release() {
            self.draining = Some(task);
        }
        Some(was_running)
    }
}

pub struct Orchestrator {
    events: EventBus,
    slot: Mutex<Slot>,
    session_tx: Arc<watch::Sender<SessionState>>,
}

impl Orchestrator {
    pub fn new(events: EventBus) -> Self {
        let (session_tx, _) = watch::channel(SessionState::default());
        Self {
            events,
            slot: Mutex::new(Slot::default()),
            session_tx: Arc::new(session_tx),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 启动一次运行；已在运行时只记一条日志并返回 false
    pub fn start(
        &self,
        env: Arc<dyn Environment>,
        settings: LoopSettings,
        session: SessionState,
    ) -> bool {
        let mut slot = self.lock();
        if slot.active.as_ref().is_some_and(RunLock::is_running) {
            self.events.log("Bot is already running - no new start");
            return false;
        }
        // 已自行结束（中断 / 任务退出）的运行
        slot.release();
        let previous = slot.draining.take();

        self.warn_unknown_limits(&settings, &session);

        let (patch_tx, patch_rx) = mpsc::unbounded_channel();
        let mut run = RunLock::new(patch_tx);
        let initial = Duration::from_millis(settings.scheduler.initial_delay_ms);

        let ctx = RunContext::new(env, settings, session, self.events.clone())
            .with_patches(patch_rx)
            .with_session_tx(Arc::clone(&self.session_tx));

        tracing::info!(
            run_id = %run.run_id(),
            waits_previous = previous.is_some(),
            "starting run"
        );
        self.events.log("Bot loop started");
        self.events.status(true);

        let task = tokio::spawn(run_loop(
            ctx,
            run.cancel_token(),
            run.running_flag(),
            self.events.clone(),
            initial,
            previous,
        ));
        run.attach(task);
        slot.active = Some(run);
        true
    }

    /// 资源门控的开关已开、但上限未知时提示：外部统计送达前该 Flow 不会启动
    fn warn_unknown_limits(&self, settings: &LoopSettings, session: &SessionState) {
        if settings.flags.battle_energy && !session.energy().is_known() {
            self.events.log(
                "Warning: battle energy is enabled but max energy is unknown, battle burst waits for stats",
            );
        }
        if settings.flags.quests && !session.quest_points().is_known() {
            self.events.log(
                "Warning: quests are enabled but max quest points are unknown, quest burst waits for stats",
            );
        }
    }

    /// 停止当前运行；可重复调用
    pub fn stop(&self) -> bool {
        if self.lock().release() == Some(true) {
            self.events.log("Bot stopped");
            self.events.status(false);
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.lock().active.as_ref().is_some_and(RunLock::is_running)
    }

    /// 投递外部统计更新，下一轮 tick 开始时合并；未运行时返回 false
    pub fn apply_stats(&self, patch: StatsPatch) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|run| run.send_patch(patch))
    }

    /// 最近一轮结束时的会话快照
    pub fn session(&self) -> watch::Receiver<SessionState> {
        self.session_tx.subscribe()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.lock().release();
    }
}

async fn run_loop(
    mut ctx: RunContext,
    token: CancellationToken,
    running: Arc<AtomicBool>,
    events: EventBus,
    initial: Duration,
    previous: Option<JoinHandle<()>>,
) {
    // 上一次运行的 tick 可能仍在环境里
    if let Some(task) = previous {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "previous run task ended abnormally");
        }
    }
    ctx.publish_session();

    let mut delay = initial;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        if !running.load(Ordering::SeqCst) || token.is_cancelled() {
            break;
        }

        match AssertUnwindSafe(ctx.tick()).catch_unwind().await {
            Ok(TickOutcome::Reschedule(next)) => delay = next,
            Ok(TickOutcome::Halt) => {
                running.store(false, Ordering::SeqCst);
                token.cancel();
                events.status(false);
                break;
            }
            Err(_) => {
                delay = ctx.recovery_delay();
                events.log(format!(
                    "Loop error: tick panicked, retrying in {}ms",
                    delay.as_millis()
                ));
            }
        }
    }
    tracing::debug!("run loop exited");
}
