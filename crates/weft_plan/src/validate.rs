//! Plan validation.
//!
//! Steps are addressed by their position in the plan. Dependency ids are
//! resolved to indices once, and cycle detection runs as an iterative DFS
//! over those indices.

use crate::step::Step;
use std::collections::HashMap;
use weft_core::StepId;

/// Plan validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Two steps share an id
    #[error("duplicate step id '{step}'")]
    DuplicateStepId {
        /// The repeated id
        step: StepId,
    },

    /// A step lists itself as a dependency
    #[error("step '{step}' depends on itself")]
    SelfDependency {
        /// The offending step
        step: StepId,
    },

    /// A dependency names a step that is not in the plan
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        /// The step declaring the dependency
        step: StepId,
        /// The unresolved id
        dependency: StepId,
    },

    /// The dependency graph contains a cycle
    #[error("dependency cycle: {}", format_path(path))]
    Cycle {
        /// Steps along the cycle, first step repeated at the end
        path: Vec<StepId>,
    },

    /// `maxParallel` is zero, so nothing could ever run
    #[error("maxParallel must be at least 1")]
    ZeroParallelism,
}

fn format_path(path: &[StepId]) -> String {
    path.iter()
        .map(StepId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Index structure produced by a successful validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolved {
    /// Step id to position
    pub index: HashMap<StepId, usize>,
    /// Deduplicated dependency indices per step, in declared order
    pub dependencies: Vec<Vec<usize>>,
}

/// Validate a set of steps
///
/// # Errors
///
/// Returns the first problem found: zero parallelism, then duplicate ids,
/// self-references and unknown dependencies in declaration order, then
/// cycles.
pub fn validate(steps: &[Step], max_parallel: usize) -> Result<(), ValidationError> {
    resolve(steps, max_parallel).map(|_| ())
}

pub(crate) fn resolve(steps: &[Step], max_parallel: usize) -> Result<Resolved, ValidationError> {
    if max_parallel == 0 {
        return Err(ValidationError::ZeroParallelism);
    }

    let mut index = HashMap::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        if index.insert(step.id.clone(), i).is_some() {
            return Err(ValidationError::DuplicateStepId {
                step: step.id.clone(),
            });
        }
    }

    let mut dependencies = Vec::with_capacity(steps.len());
    for step in steps {
        let mut resolved: Vec<usize> = Vec::with_capacity(step.dependencies.len());
        for dep in &step.dependencies {
            if *dep == step.id {
                return Err(ValidationError::SelfDependency {
                    step: step.id.clone(),
                });
            }
            let Some(&dep_idx) = index.get(dep) else {
                return Err(ValidationError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            };
            if !resolved.contains(&dep_idx) {
                resolved.push(dep_idx);
            }
        }
        dependencies.push(resolved);
    }

    if let Some(cycle) = find_cycle(&dependencies) {
        return Err(ValidationError::Cycle {
            path: cycle.into_iter().map(|i| steps[i].id.clone()).collect(),
        });
    }

    Ok(Resolved {
        index,
        dependencies,
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Find a cycle following dependency edges
///
/// Returns the cycle as a path of indices whose first element is repeated
/// at the end, or `None` if the graph is acyclic.
fn find_cycle(dependencies: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; dependencies.len()];
    // (node, next dependency to visit)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..dependencies.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::OnStack;
        stack.push((root, 0));

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let Some(&dep) = dependencies[node].get(frame.1) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match marks[dep] {
                Mark::OnStack => {
                    let start = stack.iter().position(|&(n, _)| n == dep)?;
                    let mut path: Vec<usize> = stack[start..].iter().map(|&(n, _)| n).collect();
                    path.push(dep);
                    return Some(path);
                }
                Mark::Unvisited => {
                    marks[dep] = Mark::OnStack;
                    stack.push((dep, 0));
                }
                Mark::Done => {}
            }
        }
    }

    None
}
