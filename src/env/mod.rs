//! 环境探针：核心与被驱动环境（浏览器页面）之间唯一的接口
//!
//! 元素发现的具体启发式不属于核心；核心只按能力级目标（Target）询问「是否有可点击的 X」。
//! - **fake**: 脚本化的内存环境（测试与演示）
//! - **interrupt**: 中断检测（验证码 / 反自动化挑战）
//! - **chrome**: Headless Chrome 实现（需 feature "browser"）

pub mod fake;
pub mod interrupt;

#[cfg(feature = "browser")]
pub mod chrome;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use fake::{Reaction, ScriptedEnvironment};
pub use interrupt::{Interrupt, InterruptDetector};

#[cfg(feature = "browser")]
pub use chrome::ChromeEnvironment;

/// 能力级目标：核心关心「要点什么」，环境实现决定「怎么找到它」
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// 竞技场菜单里的「Battle NPCs」入口
    BattleNpcs,
    /// 「Generate Enemy」：打开生成对手弹窗
    GenerateEnemy,
    /// 弹窗里的「Generate」确认
    GenerateConfirm,
    /// 进入战斗的「Battle」按钮
    BattleEnter,
    Attack,
    /// Continue / Confirm / OK / Yes
    Continue,
    /// Leave / Close
    Leave,
    /// 任务面板中的任务卡片（由环境挑选等级最低且未完成的）
    QuestCard,
    QuestPerform,
    /// 旅行页上的采集入口（gather / mine / chop / catch ...）
    GatherResource,
    /// 采集弹窗里的确认动作
    GatherAction,
    TakeStep,
}

impl Target {
    pub fn label(&self) -> &'static str {
        match self {
            Self::BattleNpcs => "Battle NPCs",
            Self::GenerateEnemy => "Generate Enemy",
            Self::GenerateConfirm => "Generate",
            Self::BattleEnter => "Battle",
            Self::Attack => "Attack",
            Self::Continue => "Continue",
            Self::Leave => "Leave",
            Self::QuestCard => "quest card",
            Self::QuestPerform => "Perform",
            Self::GatherResource => "resource",
            Self::GatherAction => "gather action",
            Self::TakeStep => "Take a step",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 环境返回的元素句柄：只在返回它的那一轮 tick 内有效
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub id: u64,
    pub target: Target,
    /// 元素的可见文本（日志用）
    pub text: String,
}

impl ElementHandle {
    pub fn new(id: u64, target: Target, text: impl Into<String>) -> Self {
        Self {
            id,
            target,
            text: text.into(),
        }
    }
}

/// 环境探针错误：均视为暂时性，由 Flow 就地转成 miss 或短暂恢复延迟
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("Stale element handle: {0}")]
    StaleHandle(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// 页面 / 浏览器连接已断开，本轮无法继续
    #[error("Environment disconnected: {0}")]
    Disconnected(String),

    #[error("Launch failed: {0}")]
    Launch(String),
}

/// 环境探针 trait；实现方负责超时，核心只约束两次 tick 之间的等待
#[async_trait]
pub trait Environment: Send + Sync {
    /// 查找当前可见、可用且匹配目标的元素；不存在时返回 None
    async fn locate(&self, target: Target) -> Result<Option<ElementHandle>, EnvError>;

    /// 尝试点击；失败返回 false，不因「点不到」而报错
    async fn click(&self, handle: &ElementHandle) -> bool;

    /// 当前上下文标识（通常是 URL）
    async fn current_location(&self) -> String;

    /// 尽力导航；失败由调用方记录日志
    async fn navigate(&self, target: &str) -> Result<(), EnvError>;

    /// 是否出现验证码 / 人机验证
    async fn detect_suppression_signal(&self) -> bool;

    /// 是否出现「操作过快」提示
    async fn detect_throttle_warning(&self) -> bool {
        false
    }
}
