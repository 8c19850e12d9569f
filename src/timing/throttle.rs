//! 按活动类别的自适应节流
//!
//! 检测到「操作太快」类提示时抬高惩罚值，惩罚随真实时间线性衰减（读时惰性计算），
//! 调度延迟按 `1 + penalty × 0.24` 放大；最近 12 秒内有过警告时再额外冷却。

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::timing::{Clock, PacingProfile};

const PENALTY_FACTOR: f64 = 0.24;
const RECENT_WARNING_MS: u64 = 12_000;
const DEFAULT_CEILING_MS: u64 = 60_000;
const FLOOR_MS: u64 = 250;

/// 节流类别：每类独立维护惩罚
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityClass {
    Combat,
    Gather,
    Battle,
}

impl ActivityClass {
    pub const ALL: [ActivityClass; 3] = [Self::Combat, Self::Gather, Self::Battle];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Combat => "combat",
            Self::Gather => "gather",
            Self::Battle => "battle",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Combat => 0,
            Self::Gather => 1,
            Self::Battle => 2,
        }
    }

    fn params(&self) -> ClassParams {
        match self {
            Self::Combat => ClassParams {
                max_penalty: 4.5,
                step_up: 1.0,
                step_down: 0.18,
                decay_ms: 45_000.0,
            },
            Self::Gather => ClassParams {
                max_penalty: 4.0,
                step_up: 0.9,
                step_down: 0.16,
                decay_ms: 50_000.0,
            },
            Self::Battle => ClassParams {
                max_penalty: 5.0,
                step_up: 1.1,
                step_down: 0.14,
                decay_ms: 55_000.0,
            },
        }
    }

    pub fn max_penalty(&self) -> f64 {
        self.params().max_penalty
    }
}

impl fmt::Display for ActivityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct ClassParams {
    max_penalty: f64,
    step_up: f64,
    step_down: f64,
    decay_ms: f64,
}

#[derive(Debug, Clone, Default)]
struct ThrottleState {
    penalty: f64,
    last_update_at: Option<u64>,
    last_warning_at: Option<u64>,
    warnings: u32,
}

/// tune_delay 的可选上下限
#[derive(Debug, Clone, Copy, Default)]
pub struct TuneOptions {
    pub floor_ms: Option<u64>,
    pub ceiling_ms: Option<u64>,
}

/// 对外展示的节流状态（penalty 保留两位小数）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThrottleSnapshot {
    pub class: ActivityClass,
    pub penalty: f64,
    pub warnings: u32,
    pub last_warning_at: Option<u64>,
}

pub struct Throttle {
    profile: PacingProfile,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    states: [ThrottleState; 3],
}

impl fmt::Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("profile", &self.profile)
            .field("states", &self.states)
            .finish()
    }
}

impl Throttle {
    pub fn new(profile: PacingProfile, clock: Arc<dyn Clock>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            profile,
            clock,
            rng,
            states: Default::default(),
        }
    }

    /// 按流逝时间衰减惩罚，永不为负
    pub fn decay(&mut self, class: ActivityClass) {
        let params = class.params();
        let now = self.clock.now_ms();
        let state = &mut self.states[class.index()];
        let Some(last) = state.last_update_at else {
            state.last_update_at = Some(now);
            return;
        };
        let elapsed = now.saturating_sub(last);
        if elapsed > 0 && state.penalty > 0.0 {
            let amount = (elapsed as f64 / params.decay_ms) * params.step_down;
            state.penalty = (state.penalty - amount).max(0.0);
        }
        state.last_update_at = Some(now);
    }

    /// 当前惩罚（读前先衰减）
    pub fn penalty(&mut self, class: ActivityClass) -> f64 {
        self.decay(class);
        self.states[class.index()].penalty
    }

    /// 将原始延迟按惩罚放大；raw 为 0 时返回 0（表示「本轮无动作」）
    pub fn tune_delay(&mut self, class: ActivityClass, raw_ms: u64, opts: TuneOptions) -> u64 {
        if raw_ms == 0 {
            return 0;
        }
        self.decay(class);
        let now = self.clock.now_ms();
        let state = &self.states[class.index()];
        let penalty = state.penalty;
        let recently_warned = state
            .last_warning_at
            .map(|t| now.saturating_sub(t) < RECENT_WARNING_MS)
            .unwrap_or(false);

        let mut tuned = raw_ms as f64 * self.profile.throttle_mult() * (1.0 + penalty * PENALTY_FACTOR);
        if recently_warned {
            tuned += 800.0 + self.rng.gen::<f64>() * 1_400.0;
        }
        if let Some(floor) = opts.floor_ms {
            tuned = tuned.max(floor as f64);
        }
        let ceiling = opts.ceiling_ms.unwrap_or(DEFAULT_CEILING_MS) as f64;
        tuned = tuned.min(ceiling).max(FLOOR_MS as f64);
        tuned.round() as u64
    }

    /// 记录一次「太快」警告；返回建议的放缓秒数（仅用于日志）
    pub fn mark_warning(&mut self, class: ActivityClass) -> u64 {
        let params = class.params();
        let boost = self.profile.warning_boost();
        self.decay(class);
        let now = self.clock.now_ms();
        let state = &mut self.states[class.index()];
        state.penalty = (state.penalty + params.step_up * boost).min(params.max_penalty);
        state.last_warning_at = Some(now);
        state.warnings = state.warnings.saturating_add(1);
        (6.0 + state.penalty * 2.2).round() as u64
    }

    /// 流程有进展时小幅回落惩罚
    pub fn mark_progress(&mut self, class: ActivityClass) {
        let params = class.params();
        self.decay(class);
        let state = &mut self.states[class.index()];
        state.penalty = (state.penalty - params.step_down * 0.4).max(0.0);
    }

    pub fn snapshot(&mut self, class: ActivityClass) -> ThrottleSnapshot {
        self.decay(class);
        let state = &self.states[class.index()];
        ThrottleSnapshot {
            class,
            penalty: (state.penalty * 100.0).round() / 100.0,
            warnings: state.warnings,
            last_warning_at: state.last_warning_at,
        }
    }
}
