//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `STRIDE__*` 覆盖（双下划线表示嵌套，如 `STRIDE__FLAGS__COMBAT=true`）。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::flows::{FightPriority, FlowKind};
use crate::timing::PacingProfile;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub flags: FlowFlags,
    pub pacing: PacingSection,
    pub scheduler: SchedulerSection,
    pub battle: BattleSection,
    pub quests: QuestSection,
    pub travel: TravelSection,
    pub browser: BrowserSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [flags] 段：每个开关独立启用优先级链中的一个 Flow；缺省或 false 即关闭
///
/// 未知字段直接报错，避免拼错的开关被静默忽略。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowFlags {
    pub combat: bool,
    pub quests: bool,
    /// 旅行时是否采集资源
    pub resources: bool,
    /// 满体力时进入竞技场连战
    pub battle_energy: bool,
}

/// [pacing] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PacingSection {
    #[serde(default)]
    pub profile: PacingProfile,
    /// 固定随机种子（复现问题用），缺省使用系统熵
    pub seed: Option<u64>,
}

/// [scheduler] 段：主循环的等待区间与 Flow 优先级
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// 两次 tick 之间的最短间隔
    #[serde(default = "default_min_tick_ms")]
    pub min_tick_ms: u64,
    #[serde(default = "default_idle_min_ms")]
    pub idle_min_ms: u64,
    #[serde(default = "default_idle_max_ms")]
    pub idle_max_ms: u64,
    /// tick 出错后的固定恢复延迟
    #[serde(default = "default_recovery_delay_ms")]
    pub recovery_delay_ms: u64,
    /// 非连战 Flow 的尝试顺序
    #[serde(default = "default_priority")]
    pub priority: Vec<FlowKind>,
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_min_tick_ms() -> u64 {
    500
}

fn default_idle_min_ms() -> u64 {
    6_000
}

fn default_idle_max_ms() -> u64 {
    9_000
}

fn default_recovery_delay_ms() -> u64 {
    10_000
}

fn default_priority() -> Vec<FlowKind> {
    vec![FlowKind::Combat, FlowKind::Quest, FlowKind::Travel]
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            min_tick_ms: default_min_tick_ms(),
            idle_min_ms: default_idle_min_ms(),
            idle_max_ms: default_idle_max_ms(),
            recovery_delay_ms: default_recovery_delay_ms(),
            priority: default_priority(),
        }
    }
}

/// Flow 的「领地」：离开领地超过宽限期即导航回入口
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDomain {
    pub entry_url: String,
    /// 位置中包含该片段即视为在领地内
    pub fragment: String,
    pub grace_ms: u64,
}

fn default_grace_ms() -> u64 {
    3_000
}

/// [battle] 段
#[derive(Debug, Clone, Deserialize)]
pub struct BattleSection {
    #[serde(default = "default_battle_entry")]
    pub entry_url: String,
    #[serde(default = "default_battle_fragment")]
    pub domain: String,
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// 战斗中「攻击」与「生成下一个对手」同时可用时谁优先
    #[serde(default)]
    pub fight_priority: FightPriority,
}

fn default_battle_entry() -> String {
    "https://web.simple-mmo.com/battle/arena?new_page=true".to_string()
}

fn default_battle_fragment() -> String {
    "/battle".to_string()
}

impl BattleSection {
    pub fn domain(&self) -> FlowDomain {
        FlowDomain {
            entry_url: self.entry_url.clone(),
            fragment: self.domain.clone(),
            grace_ms: self.grace_ms,
        }
    }
}

impl Default for BattleSection {
    fn default() -> Self {
        Self {
            entry_url: default_battle_entry(),
            domain: default_battle_fragment(),
            grace_ms: default_grace_ms(),
            fight_priority: FightPriority::default(),
        }
    }
}

/// [quests] 段
#[derive(Debug, Clone, Deserialize)]
pub struct QuestSection {
    #[serde(default = "default_quest_entry")]
    pub entry_url: String,
    #[serde(default = "default_quest_fragment")]
    pub domain: String,
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

fn default_quest_entry() -> String {
    "https://web.simple-mmo.com/quests?new_page=true".to_string()
}

fn default_quest_fragment() -> String {
    "/quests".to_string()
}

impl QuestSection {
    pub fn domain(&self) -> FlowDomain {
        FlowDomain {
            entry_url: self.entry_url.clone(),
            fragment: self.domain.clone(),
            grace_ms: self.grace_ms,
        }
    }
}

impl Default for QuestSection {
    fn default() -> Self {
        Self {
            entry_url: default_quest_entry(),
            domain: default_quest_fragment(),
            grace_ms: default_grace_ms(),
        }
    }
}

/// [travel] 段
#[derive(Debug, Clone, Deserialize)]
pub struct TravelSection {
    #[serde(default = "default_travel_entry")]
    pub entry_url: String,
    #[serde(default = "default_travel_fragment")]
    pub domain: String,
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

fn default_travel_entry() -> String {
    "https://web.simple-mmo.com/travel".to_string()
}

fn default_travel_fragment() -> String {
    "/travel".to_string()
}

impl TravelSection {
    pub fn domain(&self) -> FlowDomain {
        FlowDomain {
            entry_url: self.entry_url.clone(),
            fragment: self.domain.clone(),
            grace_ms: self.grace_ms,
        }
    }
}

impl Default for TravelSection {
    fn default() -> Self {
        Self {
            entry_url: default_travel_entry(),
            domain: default_travel_fragment(),
            grace_ms: default_grace_ms(),
        }
    }
}

/// [browser] 段（仅 feature "browser" 使用）
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    /// 启动后首先打开的页面，缺省为旅行入口
    pub start_url: Option<String>,
}

fn default_window_width() -> u32 {
    1366
}

fn default_window_height() -> u32 {
    900
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: false,
            window_width: default_window_width(),
            window_height: default_window_height(),
            start_url: None,
        }
    }
}

/// 一次运行所需的全部设置（从 AppConfig 中剥离浏览器等外围配置）
#[derive(Debug, Clone, Default)]
pub struct LoopSettings {
    pub flags: FlowFlags,
    pub pacing: PacingSection,
    pub scheduler: SchedulerSection,
    pub battle: BattleSection,
    pub quests: QuestSection,
    pub travel: TravelSection,
}

impl LoopSettings {
    pub fn with_flags(mut self, flags: FlowFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl From<&AppConfig> for LoopSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            flags: cfg.flags,
            pacing: cfg.pacing.clone(),
            scheduler: cfg.scheduler.clone(),
            battle: cfg.battle.clone(),
            quests: cfg.quests.clone(),
            travel: cfg.travel.clone(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 STRIDE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 STRIDE__*（双下划线表示嵌套键，scheduler.priority 以逗号分隔）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("STRIDE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("scheduler.priority")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.flags, FlowFlags::default());
        assert_eq!(cfg.scheduler.min_tick_ms, 500);
        assert_eq!(cfg.scheduler.recovery_delay_ms, 10_000);
        assert_eq!(
            cfg.scheduler.priority,
            vec![FlowKind::Combat, FlowKind::Quest, FlowKind::Travel]
        );
        assert_eq!(cfg.battle.domain().fragment, "/battle");
        assert_eq!(cfg.pacing.profile, PacingProfile::Balanced);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
[flags]
combat = true
battle_energy = true

[pacing]
profile = "safe"
seed = 42

[scheduler]
min_tick_ms = 800
priority = ["quests", "combat", "travel"]

[battle]
fight_priority = "generate-first"
grace_ms = 5000
"#,
        );
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert!(cfg.flags.combat);
        assert!(cfg.flags.battle_energy);
        assert!(!cfg.flags.quests);
        assert_eq!(cfg.pacing.profile, PacingProfile::Safe);
        assert_eq!(cfg.pacing.seed, Some(42));
        assert_eq!(cfg.scheduler.min_tick_ms, 800);
        assert_eq!(cfg.scheduler.idle_min_ms, 6_000);
        assert_eq!(cfg.scheduler.priority[0], FlowKind::Quest);
        assert_eq!(cfg.battle.fight_priority, FightPriority::GenerateFirst);
        assert_eq!(cfg.battle.grace_ms, 5_000);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let file = write_config(
            r#"
[flags]
combat = true
autopilot = true
"#,
        );
        assert!(load_config(Some(file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_flags_reject_unknown_switch() {
        let flags: FlowFlags =
            serde_json::from_value(serde_json::json!({"combat": true, "resources": true})).unwrap();
        assert!(flags.combat && flags.resources);
        assert!(!flags.battle_energy);
        assert!(serde_json::from_value::<FlowFlags>(serde_json::json!({"turbo": true})).is_err());
    }
}
