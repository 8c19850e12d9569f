//! 自适应节奏引擎：拟人化延迟（HumanPacer）+ 按活动类别的节流惩罚（Throttle）
//!
//! 两者共享同一个 PacingProfile 与 Clock；不做 I/O，随机源可注入，便于确定性测试。

pub mod clock;
pub mod human_delay;
pub mod profile;
pub mod throttle;

use std::sync::Arc;

pub use clock::{Clock, ManualClock, SystemClock};
pub use human_delay::{ActivityKind, DelayContext, HumanPacer, PacingState};
pub use profile::PacingProfile;
pub use throttle::{ActivityClass, Throttle, ThrottleSnapshot, TuneOptions};

/// 一次运行持有的节奏状态：由 RunContext 独占，按引用传入各个 Flow
#[derive(Debug)]
pub struct Pacing {
    pub pacer: HumanPacer,
    pub throttle: Throttle,
}

impl Pacing {
    /// seed 为 None 时使用系统熵
    pub fn new(profile: PacingProfile, clock: Arc<dyn Clock>, seed: Option<u64>) -> Self {
        Self {
            pacer: HumanPacer::new(profile, clock.clone(), seed),
            throttle: Throttle::new(profile, clock, seed.map(|s| s.wrapping_add(1))),
        }
    }
}
