//! Stride - 自适应会话调度器
//!
//! 在一个长会话的交互环境中驱动若干状态机式工作流，单实例运行，动作之间插入拟人化延迟，
//! 并在检测到验证挑战时停止。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、单轮 tick、会话状态、错误与恢复、优雅关闭
//! - **env**: 环境探针 trait、脚本化环境、中断检测、Chrome 实现（feature "browser"）
//! - **events**: 日志 / 状态 / 统计 / 告警事件总线
//! - **flows**: battle / combat / quests / travel 状态机与爆发门
//! - **observability**: tracing 初始化
//! - **timing**: 拟人化延迟与自适应节流

pub mod config;
pub mod core;
pub mod env;
pub mod events;
pub mod flows;
pub mod observability;
pub mod timing;

pub use crate::config::{load_config, AppConfig, FlowFlags, LoopSettings};
pub use crate::core::{Orchestrator, SessionState, StatsPatch};
pub use crate::env::{Environment, ScriptedEnvironment, Target};
pub use crate::events::{EventBus, LoopEvent};
