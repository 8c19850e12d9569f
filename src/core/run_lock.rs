//! 运行锁：保证同一时刻只有一个活动运行
//!
//! 持有取消令牌、运行标志、外部统计通道与后台任务句柄；stop 时取消令牌，
//! 正在执行的 tick 不会被中途打断，循环在下一个边界处退出。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::StatsPatch;

#[derive(Debug)]
pub struct RunLock {
    run_id: Uuid,
    cancel_token: CancellationToken,
    running: Arc<AtomicBool>,
    patches: mpsc::UnboundedSender<StatsPatch>,
    task: Option<JoinHandle<()>>,
}

impl RunLock {
    pub fn new(patches: mpsc::UnboundedSender<StatsPatch>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cancel_token: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(true)),
            patches,
            task: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 与后台循环共享的运行标志
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// 标志已清、令牌已取消或后台任务已退出（含 panic）都视为未运行
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && !self.cancel_token.is_cancelled()
            && self.task.as_ref().map_or(true, |task| !task.is_finished())
    }

    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    /// 投递外部统计；运行已结束时返回 false
    pub fn send_patch(&self, patch: StatsPatch) -> bool {
        self.is_running() && self.patches.send(patch).is_ok()
    }

    /// 释放运行：清标志、取消令牌，返回后台任务句柄（不 abort）
    pub fn release(mut self) -> Option<JoinHandle<()>> {
        self.running.store(false, Ordering::SeqCst);
        self.cancel_token.cancel();
        self.task.take()
    }
}
