//! Stage arena and the fluent chain-building API.
//!
//! Stages live in a flat `Vec` indexed by [`StageId`]; each slot records at
//! most one successor. Index 0 is a no-op root stage. Attaching a second
//! successor to a stage that already has one would branch the chain, so it
//! is recorded as a fault and reported when the pipeline is started.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::StageId;
use crate::pipeline::stage::Stage;
use crate::pipeline::unit::Unit;

/// A mistake made while building the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainFault {
    Branching(StageId),
    UnknownStage(StageId),
}

impl From<ChainFault> for PipelineError {
    fn from(fault: ChainFault) -> Self {
        match fault {
            ChainFault::Branching(stage) => PipelineError::Branching { stage },
            ChainFault::UnknownStage(stage) => PipelineError::UnknownStage(stage),
        }
    }
}

/// Linear chain of stages headed by a no-op root.
pub struct Chain<T> {
    stages: Vec<Stage<T>>,
    next: Vec<Option<StageId>>,
    /// First building mistake; surfaced by `ordered`.
    fault: Option<ChainFault>,
}

impl<T: 'static> Chain<T> {
    pub fn new() -> Self {
        Self {
            stages: vec![Stage::noop()],
            next: vec![None],
            fault: None,
        }
    }
}

impl<T: 'static> Default for Chain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Chain<T> {
    /// Add `stage` to the arena as the successor of `after`.
    pub fn attach(&mut self, after: StageId, stage: Stage<T>) -> StageId {
        let id = StageId(self.stages.len() as u32);
        match self.next.get(after.index()) {
            Some(None) => self.next[after.index()] = Some(id),
            Some(Some(_)) => {
                tracing::warn!(stage = %after, "Stage already has a successor; chain would branch");
                self.fault.get_or_insert(ChainFault::Branching(after));
            }
            None => {
                self.fault.get_or_insert(ChainFault::UnknownStage(after));
            }
        }
        self.stages.push(stage);
        self.next.push(None);
        id
    }

    pub fn get(&self, id: StageId) -> Option<&Stage<T>> {
        self.stages.get(id.index())
    }

    pub fn next(&self, id: StageId) -> Option<StageId> {
        self.next.get(id.index()).copied().flatten()
    }

    pub fn contains(&self, id: StageId) -> bool {
        id.index() < self.stages.len()
    }

    /// Last stage reachable from the root.
    pub fn tail(&self) -> StageId {
        let mut id = StageId::ROOT;
        while let Some(next) = self.next(id) {
            id = next;
        }
        id
    }

    /// Number of stages reachable from the root, root included.
    pub fn len(&self) -> usize {
        self.walk().count()
    }

    /// Never true; the root is always present.
    pub fn is_empty(&self) -> bool {
        false
    }

    fn walk(&self) -> impl Iterator<Item = StageId> + '_ {
        std::iter::successors(Some(StageId::ROOT), move |&id| self.next(id))
    }

    /// Validate the chain and return its stages in execution order.
    pub fn ordered(&self) -> PipelineResult<Vec<Stage<T>>> {
        if let Some(fault) = self.fault {
            return Err(fault.into());
        }
        Ok(self
            .walk()
            .map(|id| self.stages[id.index()].clone())
            .collect())
    }
}

/// Mutable handle to one stage of a chain, used to append successors.
pub struct StageRef<'a, T> {
    chain: &'a mut Chain<T>,
    id: StageId,
}

impl<'a, T> StageRef<'a, T> {
    pub(crate) fn new(chain: &'a mut Chain<T>, id: StageId) -> Self {
        Self { chain, id }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.chain.get(self.id).map(|stage| stage.name()).unwrap_or("stage")
    }

    pub fn next(&self) -> Option<StageId> {
        self.chain.next(self.id)
    }

    /// Append a stage built from `func` and return a handle to it.
    pub fn then<F>(self, func: F) -> StageRef<'a, T>
    where
        F: Fn(&mut Unit<T>) + Send + Sync + 'static,
    {
        self.then_stage(Stage::new(func))
    }

    /// Append an already constructed stage and return a handle to it.
    pub fn then_stage(self, stage: Stage<T>) -> StageRef<'a, T> {
        let id = self.chain.attach(self.id, stage);
        StageRef {
            chain: self.chain,
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Unit<u32>) {}

    #[test]
    fn test_new_chain_is_root_only() {
        let chain: Chain<u32> = Chain::new();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.tail(), StageId::ROOT);
        assert_eq!(chain.get(StageId::ROOT).unwrap().name(), "root");
    }

    #[test]
    fn test_fluent_building() {
        let mut chain: Chain<u32> = Chain::new();
        let last = StageRef::new(&mut chain, StageId::ROOT)
            .then(noop)
            .then_stage(Stage::named("second", noop))
            .then(noop)
            .id();
        assert_eq!(last, StageId(3));
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.tail(), last);
        assert_eq!(chain.next(StageId(1)), Some(StageId(2)));
        assert_eq!(chain.get(StageId(2)).unwrap().name(), "second");

        let ordered = chain.ordered().unwrap();
        assert_eq!(ordered.len(), 4);
        assert_eq!(ordered[2].name(), "second");
    }

    #[test]
    fn test_second_successor_is_rejected() {
        let mut chain: Chain<u32> = Chain::new();
        chain.attach(StageId::ROOT, Stage::new(noop));
        chain.attach(StageId::ROOT, Stage::new(noop));
        // The primary path is untouched.
        assert_eq!(chain.len(), 2);
        assert!(matches!(
            chain.ordered(),
            Err(PipelineError::Branching { stage }) if stage == StageId::ROOT
        ));
    }

    #[test]
    fn test_attach_to_unknown_stage() {
        let mut chain: Chain<u32> = Chain::new();
        chain.attach(StageId(42), Stage::new(noop));
        assert!(!chain.contains(StageId(42)));
        assert!(matches!(
            chain.ordered(),
            Err(PipelineError::UnknownStage(StageId(42)))
        ));
    }
}
