//! 资源爆发门：满值开始，耗尽结束，中间保持
//!
//! 上限未知（max == 0）时不做决定，维持当前状态。

use crate::core::ResourcePair;

pub fn should_burst(pair: ResourcePair, currently_bursting: bool) -> bool {
    if !pair.is_known() {
        return currently_bursting;
    }
    if currently_bursting {
        !pair.is_empty()
    } else {
        pair.is_full()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstChange {
    Started,
    Finished,
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct BurstGate {
    bursting: bool,
}

impl BurstGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bursting(&self) -> bool {
        self.bursting
    }

    pub fn update(&mut self, pair: ResourcePair) -> BurstChange {
        let next = should_burst(pair, self.bursting);
        let change = match (self.bursting, next) {
            (false, true) => BurstChange::Started,
            (true, false) => BurstChange::Finished,
            _ => BurstChange::Unchanged,
        };
        self.bursting = next;
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hysteresis() {
        assert!(should_burst(ResourcePair::new(10, 10), false));
        assert!(!should_burst(ResourcePair::new(9, 10), false));
        assert!(should_burst(ResourcePair::new(1, 10), true));
        assert!(!should_burst(ResourcePair::new(0, 10), true));
    }

    #[test]
    fn test_unknown_max_keeps_state() {
        assert!(should_burst(ResourcePair::new(3, 0), true));
        assert!(!should_burst(ResourcePair::new(3, 0), false));
    }

    #[test]
    fn test_gate_reports_edges() {
        let mut gate = BurstGate::new();
        assert_eq!(gate.update(ResourcePair::new(5, 10)), BurstChange::Unchanged);
        assert_eq!(gate.update(ResourcePair::new(10, 10)), BurstChange::Started);
        assert_eq!(gate.update(ResourcePair::new(4, 10)), BurstChange::Unchanged);
        assert!(gate.is_bursting());
        assert_eq!(gate.update(ResourcePair::new(0, 10)), BurstChange::Finished);
        assert_eq!(gate.update(ResourcePair::new(9, 10)), BurstChange::Unchanged);
        assert!(!gate.is_bursting());
    }
}
