//! 对外事件：日志、运行状态、统计快照、告警
//!
//! 事件经 broadcast 通道发出（发后即忘，无订阅者时静默丢弃）；同时写入 tracing。
//! 日志消息按文本自动归类出 level / flow / action，便于观察端过滤。

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::SessionState;

/// 事件通道默认容量
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Captcha,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Captcha => f.write_str("captcha"),
        }
    }
}

/// 结构化日志
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// 毫秒时间戳
    pub ts: i64,
    pub message: String,
    pub level: LogLevel,
    /// battle / combat / quests / travel / browser / core
    pub flow: &'static str,
    /// start / stop / click / wait / error / log
    pub action: &'static str,
}

static ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"error|failed|fout|blocked|captcha|anti-bot").expect("valid regex"));
static WARN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"warning|warn|throttle|slow down|too fast|hold on").expect("valid regex")
});
static FLOW_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"battle", "battle"),
        (r"combat|attack", "combat"),
        (r"quest", "quests"),
        (r"travel|step|gather|resource|loot|popup", "travel"),
        (r"browser|window|launch", "browser"),
    ]
    .into_iter()
    .map(|(pattern, flow)| (Regex::new(pattern).expect("valid regex"), flow))
    .collect()
});
static ACTION_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"started|active", "start"),
        (r"stopped|finished|depleted", "stop"),
        (r"clicked|opening|confirming|closing", "click"),
        (r"waiting|retry|retrying|recover", "wait"),
        (r"error|failed|fout", "error"),
    ]
    .into_iter()
    .map(|(pattern, action)| (Regex::new(pattern).expect("valid regex"), action))
    .collect()
});

impl LogRecord {
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let text = message.to_lowercase();

        let level = if ERROR_RE.is_match(&text) {
            LogLevel::Error
        } else if WARN_RE.is_match(&text) {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };
        let flow = FLOW_RULES
            .iter()
            .find(|(re, _)| re.is_match(&text))
            .map(|(_, flow)| *flow)
            .unwrap_or("core");
        let action = ACTION_RULES
            .iter()
            .find(|(re, _)| re.is_match(&text))
            .map(|(_, action)| *action)
            .unwrap_or("log");

        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            message,
            level,
            flow,
            action,
        }
    }
}

/// 循环对外发出的事件（可序列化为 JSON 供观察端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    Log(LogRecord),
    Status { running: bool },
    Stats { session: SessionState },
    Alert { kind: AlertKind, message: String },
}

/// 事件总线：可克隆，克隆体共享同一通道
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LoopEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: LoopEvent) {
        let _ = self.tx.send(event);
    }

    pub fn log(&self, message: impl Into<String>) {
        let record = LogRecord::classify(message);
        match record.level {
            LogLevel::Error => tracing::error!(flow = record.flow, "{}", record.message),
            LogLevel::Warn => tracing::warn!(flow = record.flow, "{}", record.message),
            LogLevel::Info => tracing::info!(flow = record.flow, "{}", record.message),
        }
        self.emit(LoopEvent::Log(record));
    }

    pub fn status(&self, running: bool) {
        self.emit(LoopEvent::Status { running });
    }

    pub fn stats(&self, session: &SessionState) {
        self.emit(LoopEvent::Stats {
            session: session.clone(),
        });
    }

    pub fn alert(&self, kind: AlertKind, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(kind = %kind, "{}", message);
        self.emit(LoopEvent::Alert { kind, message });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
