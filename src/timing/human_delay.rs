//! 拟人化延迟生成器
//!
//! 带状态（疲劳度、同类动作连击、分心节流）的延迟模型：基础值取钟形分布，
//! 再依次叠加档位倍率、节奏抖动、防连点、连击惩罚、疲劳、上下文、犹豫与分心，最后截断到 [250, 60000] ms。

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::timing::{Clock, PacingProfile};

/// 延迟下限（毫秒）
pub const MIN_DELAY_MS: u64 = 250;
/// 延迟上限（毫秒）
pub const MAX_DELAY_MS: u64 = 60_000;
/// 两次分心之间的最短间隔
const DISTRACTION_COOLDOWN_MS: u64 = 90_000;

/// 动作类型，用于连击统计与少量类型相关的调整
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Step,
    Resource,
    Combat,
    Close,
    Popup,
    Quest,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::Resource => "resource",
            Self::Combat => "combat",
            Self::Close => "close",
            Self::Popup => "popup",
            Self::Quest => "quest",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 上一个动作的上下文标记
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelayContext {
    pub after_resource: bool,
    pub after_combat: bool,
    pub after_nav: bool,
    pub quick: bool,
}

impl DelayContext {
    pub fn after_combat() -> Self {
        Self {
            after_combat: true,
            ..Self::default()
        }
    }

    pub fn after_nav() -> Self {
        Self {
            after_nav: true,
            ..Self::default()
        }
    }

    pub fn after_resource() -> Self {
        Self {
            after_resource: true,
            ..Self::default()
        }
    }

    pub fn quick(mut self) -> Self {
        self.quick = true;
        self
    }
}

/// 全局节奏记忆
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PacingState {
    pub last_action_at: Option<u64>,
    pub last_kind: Option<ActivityKind>,
    /// 连续同类动作次数
    pub streak: u32,
    /// 0..=1，随动作缓慢上升，空闲时回落
    pub fatigue: f64,
    pub last_distraction_at: Option<u64>,
}

/// 拟人化延迟生成器
pub struct HumanPacer {
    profile: PacingProfile,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    state: PacingState,
}

impl fmt::Debug for HumanPacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HumanPacer")
            .field("profile", &self.profile)
            .field("state", &self.state)
            .finish()
    }
}

fn clamp(n: f64, lo: f64, hi: f64) -> f64 {
    n.max(lo).min(hi)
}

impl HumanPacer {
    pub fn new(profile: PacingProfile, clock: Arc<dyn Clock>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            profile,
            clock,
            rng,
            state: PacingState::default(),
        }
    }

    pub fn profile(&self) -> PacingProfile {
        self.profile
    }

    pub fn state(&self) -> &PacingState {
        &self.state
    }

    fn uniform(&mut self, min: f64, max: f64) -> f64 {
        min + self.rng.gen::<f64>() * (max - min)
    }

    fn should(&mut self, p: f64) -> bool {
        self.rng.gen::<f64>() < p
    }

    /// 三次均匀采样取平均：质量集中在区间中部
    fn soft_skew(&mut self, min: f64, max: f64) -> f64 {
        let t = (self.rng.gen::<f64>() + self.rng.gen::<f64>() + self.rng.gen::<f64>()) / 3.0;
        min + (max - min) * t
    }

    fn decay_fatigue(&mut self, now: u64) {
        let idle = self
            .state
            .last_action_at
            .map(|t| now.saturating_sub(t))
            .unwrap_or(0);
        if idle > 60_000 {
            self.state.fatigue = clamp(self.state.fatigue - 0.12, 0.0, 1.0);
        } else if idle > 15_000 {
            self.state.fatigue = clamp(self.state.fatigue - 0.06, 0.0, 1.0);
        }
    }

    fn record(&mut self, kind: ActivityKind, now: u64) {
        if self.state.last_kind == Some(kind) {
            self.state.streak = self.state.streak.saturating_add(1);
        } else {
            self.state.streak = 1;
        }
        self.state.last_kind = Some(kind);
        self.state.last_action_at = Some(now);
        self.state.fatigue = clamp(self.state.fatigue + 0.01, 0.0, 1.0);
    }

    /// 生成下一次动作前的等待时长（毫秒）
    pub fn human_delay(
        &mut self,
        kind: ActivityKind,
        base_min: u64,
        base_max: u64,
        ctx: DelayContext,
    ) -> u64 {
        let now = self.clock.now_ms();
        let since_last = self.state.last_action_at.map(|t| now.saturating_sub(t));

        self.decay_fatigue(now);
        self.record(kind, now);

        let (lo, hi) = if base_min <= base_max {
            (base_min as f64, base_max as f64)
        } else {
            (base_max as f64, base_min as f64)
        };
        let mut delay = self.soft_skew(lo, hi);
        delay *= self.profile.pace_mult();

        let pace_roll = self.rng.gen::<f64>();
        if pace_roll < 0.18 {
            delay *= self.uniform(0.84, 0.95);
        } else if pace_roll > 0.86 {
            delay *= self.uniform(1.10, 1.28);
        }

        match since_last {
            Some(ms) if ms < 1_800 => delay += self.uniform(500.0, 1_350.0),
            Some(ms) if ms < 3_200 => delay += self.uniform(180.0, 700.0),
            _ => {}
        }

        let streak = self.state.streak;
        if streak >= 4 {
            delay *= 1.08;
        }
        if streak >= 8 {
            delay *= 1.15;
        }
        if streak >= 12 {
            delay *= 1.22;
        }

        // 走路可以比战斗 / 采集更轻快
        if kind == ActivityKind::Step {
            delay *= self.uniform(0.84, 1.04);
        }

        delay *= 1.0 + self.state.fatigue * 0.18;

        if ctx.after_resource {
            delay *= 1.10;
        }
        if ctx.after_combat {
            delay *= 1.08;
        }
        if ctx.after_nav {
            delay *= 1.05;
        }
        if ctx.quick {
            delay *= 0.90;
        }

        let boost = self.profile.distraction_boost();
        if self.should(clamp(0.32 + boost, 0.08, 0.5)) {
            delay += self.uniform(90.0, 520.0);
        }

        let can_distract = self
            .state
            .last_distraction_at
            .map(|t| now.saturating_sub(t) > DISTRACTION_COOLDOWN_MS)
            .unwrap_or(true);
        let distract_base = if kind == ActivityKind::Step { 0.045 } else { 0.035 };
        let distract_chance = clamp(distract_base + boost, 0.005, 0.09);
        if can_distract && self.should(distract_chance) {
            delay += self.uniform(4_000.0, 12_000.0);
            self.state.last_distraction_at = Some(now);
        }

        clamp(delay, MIN_DELAY_MS as f64, MAX_DELAY_MS as f64).round() as u64
    }
}
