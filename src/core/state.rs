//! 会话统计：所有 Flow 共享、由当前运行独占的可变记录
//!
//! Flow 只能修改「刚刚执行的动作」所产生的字段（如确认开战后扣 1 点体力）；
//! 外部采集到的数值以 StatsPatch 的形式在 tick 开始时合并，保证每轮单写者。

use serde::{Deserialize, Serialize};

/// (current, max) 资源对；max 为 0 表示尚未得知上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ResourcePair {
    pub current: u32,
    pub max: u32,
}

impl ResourcePair {
    pub fn new(current: u32, max: u32) -> Self {
        Self { current, max }
    }

    pub fn is_known(&self) -> bool {
        self.max > 0
    }

    pub fn is_full(&self) -> bool {
        self.is_known() && self.current >= self.max
    }

    pub fn is_empty(&self) -> bool {
        self.current == 0
    }

    /// 百分比（0..=100）；上限未知时为 None
    pub fn percent(&self) -> Option<f64> {
        if !self.is_known() {
            return None;
        }
        Some((self.current as f64 / self.max as f64 * 100.0).clamp(0.0, 100.0))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub steps: u64,
    pub items: u64,
    pub energy: u32,
    pub max_energy: u32,
    pub energy_percent: f64,
    pub quest_points: u32,
    pub max_quest_points: u32,
    pub qp_percent: f64,
    pub current_hp: u32,
    pub max_hp: u32,
    pub hp_percent: f64,
    /// 最近一次更新的毫秒时间戳
    pub updated_at: i64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn energy(&self) -> ResourcePair {
        ResourcePair::new(self.energy, self.max_energy)
    }

    pub fn quest_points(&self) -> ResourcePair {
        ResourcePair::new(self.quest_points, self.max_quest_points)
    }

    pub fn health(&self) -> ResourcePair {
        ResourcePair::new(self.current_hp, self.max_hp)
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    fn recompute_percentages(&mut self) {
        if let Some(p) = self.energy().percent() {
            self.energy_percent = p;
        }
        if let Some(p) = self.quest_points().percent() {
            self.qp_percent = p;
        }
        if let Some(p) = self.health().percent() {
            self.hp_percent = p;
        }
    }

    /// 确认开战后扣除 1 点体力
    pub fn consume_energy(&mut self) {
        self.energy = self.energy.saturating_sub(1);
        self.recompute_percentages();
        self.touch();
    }

    /// 执行任务后扣除 1 点任务点
    pub fn consume_quest_point(&mut self) {
        self.quest_points = self.quest_points.saturating_sub(1);
        self.recompute_percentages();
        self.touch();
    }

    pub fn record_step(&mut self) {
        self.steps += 1;
        self.touch();
    }

    pub fn record_item(&mut self) {
        self.items += 1;
        self.touch();
    }

    /// 合并外部采集到的数值
    pub fn apply(&mut self, patch: &StatsPatch) {
        if let Some(v) = patch.energy {
            self.energy = v;
        }
        if let Some(v) = patch.max_energy {
            self.max_energy = v;
        }
        if let Some(v) = patch.quest_points {
            self.quest_points = v;
        }
        if let Some(v) = patch.max_quest_points {
            self.max_quest_points = v;
        }
        if let Some(v) = patch.current_hp {
            self.current_hp = v;
        }
        if let Some(v) = patch.max_hp {
            self.max_hp = v;
        }
        self.recompute_percentages();
        self.touch();
    }
}

/// 外部统计采集器提交的部分更新
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsPatch {
    pub energy: Option<u32>,
    pub max_energy: Option<u32>,
    pub quest_points: Option<u32>,
    pub max_quest_points: Option<u32>,
    pub current_hp: Option<u32>,
    pub max_hp: Option<u32>,
}

impl StatsPatch {
    pub fn energy(current: u32, max: u32) -> Self {
        Self {
            energy: Some(current),
            max_energy: Some(max),
            ..Self::default()
        }
    }

    pub fn quest_points(current: u32, max: u32) -> Self {
        Self {
            quest_points: Some(current),
            max_quest_points: Some(max),
            ..Self::default()
        }
    }
}
