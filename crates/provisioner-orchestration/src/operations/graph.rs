//! # Stage Graph
//!
//! Registry of steps for one operation type. The graph is a single chain
//! ending in `Stage::Finished`; `build()` rejects anything else so a broken
//! wiring is caught at startup instead of halfway through an operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use provisioner_shared::{OperationType, Stage};

use super::step::Step;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("{operation_type}: graph has no steps")]
    Empty { operation_type: OperationType },

    #[error("{operation_type}: stage {stage} registered twice")]
    DuplicateStage {
        operation_type: OperationType,
        stage: Stage,
    },

    #[error("{operation_type}: a step cannot be registered for the terminal stage")]
    TerminalStageRegistered { operation_type: OperationType },

    #[error("{operation_type}: stage {stage} names itself as successor")]
    SelfSuccessor {
        operation_type: OperationType,
        stage: Stage,
    },

    #[error("{operation_type}: stage {stage} transitions to unregistered stage {successor}")]
    UnknownSuccessor {
        operation_type: OperationType,
        stage: Stage,
        successor: Stage,
    },

    #[error("{operation_type}: expected exactly one entry stage, found {found:?}")]
    AmbiguousEntry {
        operation_type: OperationType,
        found: Vec<Stage>,
    },

    #[error("{operation_type}: chain loops back to stage {stage} without reaching Finished")]
    Cycle {
        operation_type: OperationType,
        stage: Stage,
    },

    #[error("{operation_type}: stage {stage} is not reachable from the entry stage")]
    Unreachable {
        operation_type: OperationType,
        stage: Stage,
    },
}

#[derive(Debug)]
pub struct StageGraph {
    operation_type: OperationType,
    steps: HashMap<Stage, Arc<dyn Step>>,
    order: Vec<Stage>,
}

impl StageGraph {
    pub fn builder(operation_type: OperationType) -> StageGraphBuilder {
        StageGraphBuilder {
            operation_type,
            steps: Vec::new(),
        }
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    pub fn step_for(&self, stage: Stage) -> Option<&Arc<dyn Step>> {
        self.steps.get(&stage)
    }

    pub fn contains(&self, stage: Stage) -> bool {
        stage == Stage::Finished || self.steps.contains_key(&stage)
    }

    /// Number of non-terminal stages
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Stage a newly created operation of this type starts at
    pub fn entry_stage(&self) -> Stage {
        self.order.first().copied().unwrap_or(Stage::Finished)
    }

    /// Non-terminal stages in execution order
    pub fn stages_in_order(&self) -> &[Stage] {
        &self.order
    }
}

#[derive(Debug)]
pub struct StageGraphBuilder {
    operation_type: OperationType,
    steps: Vec<Arc<dyn Step>>,
}

impl StageGraphBuilder {
    #[must_use]
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    #[must_use]
    pub fn shared_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Result<StageGraph, GraphError> {
        let operation_type = self.operation_type;
        if self.steps.is_empty() {
            return Err(GraphError::Empty { operation_type });
        }

        let mut steps: HashMap<Stage, Arc<dyn Step>> = HashMap::with_capacity(self.steps.len());
        for step in self.steps {
            let stage = step.name();
            if stage.is_terminal() {
                return Err(GraphError::TerminalStageRegistered { operation_type });
            }
            if step.next_stage() == stage {
                return Err(GraphError::SelfSuccessor {
                    operation_type,
                    stage,
                });
            }
            if steps.insert(stage, step).is_some() {
                return Err(GraphError::DuplicateStage {
                    operation_type,
                    stage,
                });
            }
        }

        let mut successors = HashSet::new();
        for (stage, step) in &steps {
            let successor = step.next_stage();
            if !successor.is_terminal() && !steps.contains_key(&successor) {
                return Err(GraphError::UnknownSuccessor {
                    operation_type,
                    stage: *stage,
                    successor,
                });
            }
            successors.insert(successor);
        }

        let mut entries: Vec<Stage> = steps
            .keys()
            .copied()
            .filter(|stage| !successors.contains(stage))
            .collect();
        entries.sort();
        if entries.len() != 1 {
            return Err(GraphError::AmbiguousEntry {
                operation_type,
                found: entries,
            });
        }

        // One successor per stage and a single entry: following the chain
        // either reaches Finished or loops back onto a visited stage
        let mut order = Vec::with_capacity(steps.len());
        let mut visited = HashSet::new();
        let mut current = entries[0];
        while !current.is_terminal() && visited.insert(current) {
            order.push(current);
            current = match steps.get(&current) {
                Some(step) => step.next_stage(),
                None => break,
            };
        }
        if !current.is_terminal() {
            return Err(GraphError::Cycle {
                operation_type,
                stage: current,
            });
        }

        if let Some(stage) = Stage::ALL
            .into_iter()
            .find(|stage| steps.contains_key(stage) && !visited.contains(stage))
        {
            return Err(GraphError::Unreachable {
                operation_type,
                stage,
            });
        }

        Ok(StageGraph {
            operation_type,
            steps,
            order,
        })
    }
}
