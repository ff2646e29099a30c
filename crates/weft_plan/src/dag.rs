//! Validated execution plan.
//!
//! An [`ExecutionPlan`] is an arena of steps addressed by their position in
//! the plan. Dependency and dependent edges are stored as index lists so
//! the scheduler never touches ids on its hot path. A plan can only be
//! obtained through validation, so every plan in hand is acyclic with
//! unique ids and resolvable dependencies.

use crate::step::Step;
use crate::validate::{resolve, ValidationError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use weft_core::{PlanId, StepId, StepStatus};

/// Default `maxParallel` when a plan document omits it
pub const DEFAULT_MAX_PARALLEL: usize = 4;

fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}

/// Wire form of a plan, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanDocument {
    id: PlanId,
    #[serde(default = "default_max_parallel")]
    max_parallel: usize,
    #[serde(default)]
    steps: Vec<Step>,
}

/// A validated, immutable plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanDocument", into = "PlanDocument")]
pub struct ExecutionPlan {
    /// Plan id
    id: PlanId,
    /// Concurrency bound requested by the planner
    max_parallel: usize,
    /// Steps in declaration order
    steps: Vec<Step>,
    /// Step id to index
    index: HashMap<StepId, usize>,
    /// Dependency indices per step
    dependencies: Vec<Vec<usize>>,
    /// Reverse edges: steps that depend on each step, in declaration order
    dependents: Vec<Vec<usize>>,
}

impl ExecutionPlan {
    /// Validate steps and build a plan
    ///
    /// # Errors
    ///
    /// Returns error if the steps do not form a valid DAG or `max_parallel`
    /// is zero
    pub fn new(
        id: impl Into<PlanId>,
        max_parallel: usize,
        steps: Vec<Step>,
    ) -> Result<Self, ValidationError> {
        let resolved = resolve(&steps, max_parallel)?;

        let mut dependents = vec![Vec::new(); steps.len()];
        for (idx, deps) in resolved.dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(idx);
            }
        }

        Ok(Self {
            id: id.into(),
            max_parallel,
            steps,
            index: resolved.index,
            dependencies: resolved.dependencies,
            dependents,
        })
    }

    /// Parse and validate a JSON plan document
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or fails validation
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Plan id
    #[must_use]
    pub fn id(&self) -> &PlanId {
        &self.id
    }

    /// Concurrency bound requested by the planner
    #[must_use]
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// All steps in declaration order
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step at `idx`
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range
    #[must_use]
    pub fn step(&self, idx: usize) -> &Step {
        &self.steps[idx]
    }

    /// Look up a step by id
    #[must_use]
    pub fn get(&self, id: &StepId) -> Option<&Step> {
        self.index_of(id).map(|idx| &self.steps[idx])
    }

    /// Position of a step
    #[must_use]
    pub fn index_of(&self, id: &StepId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Direct dependencies of a step
    #[must_use]
    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.dependencies[idx]
    }

    /// Direct dependents of a step
    #[must_use]
    pub fn dependents(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Every step reachable through dependent edges, in declaration order
    #[must_use]
    pub fn transitive_dependents(&self, idx: usize) -> Vec<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.dependents[idx].iter().copied().collect();

        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.dependents[next].iter().copied());
            }
        }

        seen.into_iter().collect()
    }

    /// Steps eligible for dispatch given the current statuses
    ///
    /// A step is eligible when it is pending or ready and every dependency
    /// is completed. A failed, skipped or cancelled dependency never makes
    /// a dependent eligible. Results are in declaration order.
    #[must_use]
    pub fn ready_steps(&self, statuses: &[StepStatus]) -> Vec<usize> {
        (0..self.steps.len())
            .filter(|&idx| matches!(statuses[idx], StepStatus::Pending | StepStatus::Ready))
            .filter(|&idx| {
                self.dependencies[idx]
                    .iter()
                    .all(|&dep| statuses[dep] == StepStatus::Completed)
            })
            .collect()
    }

    /// A topological order of the steps, earliest-declared first among ties
    #[must_use]
    pub fn topological_order(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.steps.len())
            .filter(|&idx| remaining[idx] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for &dependent in &self.dependents[idx] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        order
    }

    /// Steps that declare `key` as a produced context key
    #[must_use]
    pub fn producers_of(&self, key: &str) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.produced_context_keys.iter().any(|k| k == key))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Context keys declared by more than one step
    ///
    /// Such plans are valid: whichever producer completes last wins. This
    /// is surfaced for plan authors as a warning.
    #[must_use]
    pub fn shared_producers(&self) -> IndexMap<String, Vec<StepId>> {
        let mut producers: IndexMap<String, Vec<StepId>> = IndexMap::new();
        for step in &self.steps {
            for key in &step.produced_context_keys {
                let entry = producers.entry(key.clone()).or_default();
                if !entry.contains(&step.id) {
                    entry.push(step.id.clone());
                }
            }
        }
        producers.retain(|_, steps| steps.len() > 1);
        producers
    }

    /// Number of steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Iterate over `(index, step)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Step)> {
        self.steps.iter().enumerate()
    }
}

impl TryFrom<PlanDocument> for ExecutionPlan {
    type Error = ValidationError;

    fn try_from(doc: PlanDocument) -> Result<Self, Self::Error> {
        Self::new(doc.id, doc.max_parallel, doc.steps)
    }
}

impl From<ExecutionPlan> for PlanDocument {
    fn from(plan: ExecutionPlan) -> Self {
        Self {
            id: plan.id,
            max_parallel: plan.max_parallel,
            steps: plan.steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn diamond() -> ExecutionPlan {
        ExecutionPlan::new(
            "video",
            2,
            vec![
                Step::new("script", "llm").produces("script"),
                Step::new("voice", "tts").depends_on("script").requires("script"),
                Step::new("scenes", "img").depends_on("script").requires("script"),
                Step::new("render", "ffmpeg").depends_on("voice").depends_on("scenes"),
                Step::new("thumb", "img"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_plan_new() {
        let plan = diamond();
        assert_eq!(plan.id().as_str(), "video");
        assert_eq!(plan.max_parallel(), 2);
        assert_eq!(plan.len(), 5);
        assert!(!plan.is_empty());
        assert_eq!(plan.index_of(&StepId::new("render")), Some(3));
        assert!(plan.get(&StepId::new("missing")).is_none());
    }

    #[test]
    fn test_plan_edges() {
        let plan = diamond();
        assert_eq!(plan.dependencies(3), &[1, 2]);
        assert_eq!(plan.dependents(0), &[1, 2]);
        assert!(plan.dependents(4).is_empty());
    }

    #[test]
    fn test_transitive_dependents() {
        let plan = diamond();
        assert_eq!(plan.transitive_dependents(0), vec![1, 2, 3]);
        assert_eq!(plan.transitive_dependents(1), vec![3]);
        assert!(plan.transitive_dependents(4).is_empty());
    }

    #[test]
    fn test_ready_steps_initial() {
        let plan = diamond();
        let statuses = vec![StepStatus::Pending; plan.len()];
        assert_eq!(plan.ready_steps(&statuses), vec![0, 4]);
    }

    #[test]
    fn test_ready_steps_requires_all_completed() {
        let plan = diamond();
        let mut statuses = vec![StepStatus::Pending; plan.len()];
        statuses[0] = StepStatus::Completed;
        statuses[1] = StepStatus::Completed;
        statuses[2] = StepStatus::Running;
        statuses[4] = StepStatus::Running;

        assert!(plan.ready_steps(&statuses).is_empty());

        statuses[2] = StepStatus::Failed;
        assert!(plan.ready_steps(&statuses).is_empty());
    }

    #[test]
    fn test_topological_order() {
        let plan = diamond();
        assert_eq!(plan.topological_order(), vec![0, 1, 2, 3, 4]);

        let reversed = ExecutionPlan::new(
            "p",
            1,
            vec![
                Step::new("c", "echo").depends_on("b"),
                Step::new("b", "echo").depends_on("a"),
                Step::new("a", "echo"),
            ],
        )
        .unwrap();
        assert_eq!(reversed.topological_order(), vec![2, 1, 0]);
    }

    #[test]
    fn test_shared_producers() {
        let plan = ExecutionPlan::new(
            "p",
            2,
            vec![
                Step::new("a", "echo").produces("k").produces("only_a"),
                Step::new("b", "echo").produces("k"),
            ],
        )
        .unwrap();

        assert_eq!(plan.producers_of("k"), vec![0, 1]);
        let shared = plan.shared_producers();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared["k"], vec![StepId::new("a"), StepId::new("b")]);
    }

    #[test]
    fn test_plan_from_json() {
        let plan = ExecutionPlan::from_json(
            r#"{
                "id": "p1",
                "maxParallel": 3,
                "steps": [
                    {"id": "a", "toolId": "echo", "producedContextKeys": ["x"]},
                    {"id": "b", "toolId": "echo", "dependencies": ["a"], "requiredContextKeys": ["x"]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(plan.max_parallel(), 3);
        assert_eq!(plan.dependencies(1), &[0]);
    }

    #[test]
    fn test_plan_from_json_default_parallelism() {
        let plan = ExecutionPlan::from_json(r#"{"id": "p", "steps": []}"#).unwrap();
        assert_eq!(plan.max_parallel(), DEFAULT_MAX_PARALLEL);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_from_json_rejects_cycle() {
        let err = ExecutionPlan::from_json(
            r#"{"id": "p", "maxParallel": 1, "steps": [
                {"id": "a", "toolId": "echo", "dependencies": ["b"]},
                {"id": "b", "toolId": "echo", "dependencies": ["a"]}
            ]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("dependency cycle"));
    }

    #[test]
    fn test_plan_serialize_roundtrip() {
        let plan = diamond();
        let json = serde_json::to_string(&plan).unwrap();
        let back = ExecutionPlan::from_json(&json).unwrap();
        assert_eq!(plan, back);
    }

    proptest! {
        #[test]
        fn prop_topological_order_respects_dependencies(
            edges in proptest::collection::vec((0usize..16, 0usize..16), 0..40)
        ) {
            let n = 16;
            let steps: Vec<Step> = (0..n)
                .map(|i| {
                    edges
                        .iter()
                        .filter(|&&(a, b)| a.max(b) == i && a != b)
                        .fold(Step::new(format!("s{}", i), "echo"), |s, &(a, b)| {
                            s.depends_on(format!("s{}", a.min(b)))
                        })
                })
                .collect();
            let plan = ExecutionPlan::new("p", 4, steps).unwrap();

            let order = plan.topological_order();
            prop_assert_eq!(order.len(), n);
            let mut position = vec![0; n];
            for (pos, &idx) in order.iter().enumerate() {
                position[idx] = pos;
            }
            for idx in 0..n {
                for &dep in plan.dependencies(idx) {
                    prop_assert!(position[dep] < position[idx]);
                }
            }
        }
    }
}
