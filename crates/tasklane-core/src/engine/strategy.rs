//! Execution strategies.
//!
//! A strategy decides, before every engine step, which runnable task goes
//! next or whether the run returns control to the caller.

use tasklane_types::instance::StrategyKind;
use uuid::Uuid;

/// What a strategy sees before each step.
#[derive(Debug)]
pub struct StepView<'a> {
    /// Ready automated tasks, ordered by their ordering key.
    pub runnable: &'a [Uuid],
    /// Human tasks that became ready during this run and are still ready.
    pub new_human_tasks: usize,
    /// Tasks executed so far in this run.
    pub executed: usize,
}

pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// The next task to execute, or `None` to end the run.
    fn next_task(&self, view: &StepView<'_>) -> Option<Uuid>;
}

/// Runs the next ready automated task until a human task opens.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStrategy;

impl ExecutionStrategy for DefaultStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Default
    }

    fn next_task(&self, view: &StepView<'_>) -> Option<Uuid> {
        if view.new_human_tasks > 0 {
            return None;
        }
        view.runnable.first().copied()
    }
}

/// Exhausts every runnable task, including ones made ready along the way.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedyStrategy;

impl ExecutionStrategy for GreedyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Greedy
    }

    fn next_task(&self, view: &StepView<'_>) -> Option<Uuid> {
        view.runnable.first().copied()
    }
}

pub fn strategy_for(kind: StrategyKind) -> Box<dyn ExecutionStrategy> {
    match kind {
        StrategyKind::Default => Box::new(DefaultStrategy),
        StrategyKind::Greedy => Box::new(GreedyStrategy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stops_at_new_human_task() {
        let ids = [Uuid::now_v7(), Uuid::now_v7()];
        let view = StepView {
            runnable: &ids,
            new_human_tasks: 1,
            executed: 3,
        };
        assert_eq!(DefaultStrategy.next_task(&view), None);
        assert_eq!(GreedyStrategy.next_task(&view), Some(ids[0]));
    }

    #[test]
    fn test_both_pick_lowest_sequence_first() {
        let ids = [Uuid::now_v7(), Uuid::now_v7()];
        let view = StepView {
            runnable: &ids,
            new_human_tasks: 0,
            executed: 0,
        };
        assert_eq!(DefaultStrategy.next_task(&view), Some(ids[0]));
        assert_eq!(GreedyStrategy.next_task(&view), Some(ids[0]));
    }

    #[test]
    fn test_strategy_for_kind() {
        assert_eq!(strategy_for(StrategyKind::Greedy).kind(), StrategyKind::Greedy);
        assert_eq!(strategy_for(StrategyKind::Default).kind(), StrategyKind::Default);
        let view = StepView {
            runnable: &[],
            new_human_tasks: 0,
            executed: 0,
        };
        assert_eq!(strategy_for(StrategyKind::Greedy).next_task(&view), None);
    }
}
