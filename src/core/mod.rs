//! 核心编排层：错误与恢复、会话状态、运行锁、单轮 tick、主循环、优雅关闭

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod run_lock;
pub mod shutdown;
pub mod state;
pub mod tick;

pub use error::{LoopError, RecoveryAction};
pub use orchestrator::Orchestrator;
pub use recovery::RecoveryEngine;
pub use run_lock::RunLock;
pub use shutdown::{
    run_with_graceful_shutdown, OrchestratorCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
pub use state::{ResourcePair, SessionState, StatsPatch};
pub use tick::{RunContext, TickOutcome};
