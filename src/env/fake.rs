//! 脚本化环境（用于测试，无需浏览器）
//!
//! 维护一组「当前可见目标」与当前位置；可为目标配置点击失败或点击后的状态变化，
//! 并记录所有点击与导航，便于断言「每轮最多一个动作」。

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::env::{ElementHandle, EnvError, Environment, Target};

/// 点击某个目标后环境的变化
#[derive(Debug, Clone, Default)]
pub struct Reaction {
    pub show: Vec<Target>,
    pub hide: Vec<Target>,
    pub location: Option<String>,
}

impl Reaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(mut self, target: Target) -> Self {
        self.show.push(target);
        self
    }

    pub fn hide(mut self, target: Target) -> Self {
        self.hide.push(target);
        self
    }

    pub fn goto(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    location: String,
    visible: HashSet<Target>,
    failing_clicks: HashSet<Target>,
    reactions: HashMap<Target, Reaction>,
    probe_error: Option<EnvError>,
    navigation_error: Option<EnvError>,
    suppression: bool,
    throttle_warning: bool,
    next_id: u64,
    clicks: Vec<Target>,
    navigations: Vec<String>,
    suppression_checks: usize,
}

#[derive(Debug, Default)]
pub struct ScriptedEnvironment {
    state: Mutex<FakeState>,
}

impl ScriptedEnvironment {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                location: location.into(),
                ..FakeState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn show(&self, target: Target) {
        self.lock().visible.insert(target);
    }

    pub fn hide(&self, target: Target) {
        self.lock().visible.remove(&target);
    }

    /// 替换整组可见目标
    pub fn set_visible(&self, targets: &[Target]) {
        let mut state = self.lock();
        state.visible = targets.iter().copied().collect();
    }

    pub fn fail_clicks(&self, target: Target) {
        self.lock().failing_clicks.insert(target);
    }

    pub fn on_click(&self, target: Target, reaction: Reaction) {
        self.lock().reactions.insert(target, reaction);
    }

    pub fn set_location(&self, location: impl Into<String>) {
        self.lock().location = location.into();
    }

    /// 之后所有 locate 调用都返回该错误（None 取消）
    pub fn set_probe_error(&self, error: Option<EnvError>) {
        self.lock().probe_error = error;
    }

    pub fn set_navigation_error(&self, error: Option<EnvError>) {
        self.lock().navigation_error = error;
    }

    pub fn set_suppression(&self, on: bool) {
        self.lock().suppression = on;
    }

    pub fn set_throttle_warning(&self, on: bool) {
        self.lock().throttle_warning = on;
    }

    pub fn clicks(&self) -> Vec<Target> {
        self.lock().clicks.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    pub fn suppression_checks(&self) -> usize {
        self.lock().suppression_checks
    }
}

#[async_trait]
impl Environment for ScriptedEnvironment {
    async fn locate(&self, target: Target) -> Result<Option<ElementHandle>, EnvError> {
        let mut state = self.lock();
        if let Some(err) = state.probe_error.clone() {
            return Err(err);
        }
        if !state.visible.contains(&target) {
            return Ok(None);
        }
        state.next_id += 1;
        Ok(Some(ElementHandle::new(state.next_id, target, target.label())))
    }

    async fn click(&self, handle: &ElementHandle) -> bool {
        let mut state = self.lock();
        if state.failing_clicks.contains(&handle.target) {
            return false;
        }
        state.clicks.push(handle.target);
        if let Some(reaction) = state.reactions.get(&handle.target).cloned() {
            for t in reaction.hide {
                state.visible.remove(&t);
            }
            for t in reaction.show {
                state.visible.insert(t);
            }
            if let Some(location) = reaction.location {
                state.location = location;
            }
        }
        true
    }

    async fn current_location(&self) -> String {
        self.lock().location.clone()
    }

    async fn navigate(&self, target: &str) -> Result<(), EnvError> {
        let mut state = self.lock();
        state.navigations.push(target.to_string());
        if let Some(err) = state.navigation_error.clone() {
            return Err(err);
        }
        state.location = target.to_string();
        Ok(())
    }

    async fn detect_suppression_signal(&self) -> bool {
        let mut state = self.lock();
        state.suppression_checks += 1;
        state.suppression
    }

    async fn detect_throttle_warning(&self) -> bool {
        self.lock().throttle_warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reaction_updates_visibility_and_location() {
        let env = ScriptedEnvironment::new("https://game.test/battle/arena");
        env.show(Target::GenerateEnemy);
        env.on_click(
            Target::GenerateEnemy,
            Reaction::new()
                .hide(Target::GenerateEnemy)
                .show(Target::GenerateConfirm)
                .goto("https://game.test/battle/arena#popup"),
        );

        let handle = env.locate(Target::GenerateEnemy).await.unwrap().unwrap();
        assert!(env.click(&handle).await);
        assert!(env.locate(Target::GenerateEnemy).await.unwrap().is_none());
        assert!(env.locate(Target::GenerateConfirm).await.unwrap().is_some());
        assert!(env.current_location().await.ends_with("#popup"));
        assert_eq!(env.clicks(), vec![Target::GenerateEnemy]);
    }

    #[tokio::test]
    async fn test_failing_click_is_not_recorded() {
        let env = ScriptedEnvironment::new("x");
        env.show(Target::Attack);
        env.fail_clicks(Target::Attack);
        let handle = env.locate(Target::Attack).await.unwrap().unwrap();
        assert!(!env.click(&handle).await);
        assert!(env.clicks().is_empty());
    }
}
