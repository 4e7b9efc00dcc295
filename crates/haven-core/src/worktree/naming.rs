//! Branch naming for the configured hierarchy strategy (§4.2).

use crate::config::BranchingStrategy;

/// Identifiers needed to resolve a task's place in the branch hierarchy.
#[derive(Debug, Clone)]
pub struct BranchContext {
    pub task_id: String,
    pub epic_id: Option<String>,
    pub prd_id: Option<String>,
}

pub struct HierarchyBranch {
    pub name: String,
    pub parent: String,
}

pub fn task_branch(task_id: &str) -> String {
    format!("task/{task_id}")
}

pub fn prd_branch(prd_id: &str) -> String {
    format!("prd/{prd_id}")
}

pub fn epic_branch(prd_id: &str, epic_id: &str) -> String {
    format!("epic/{prd_id}/{epic_id}")
}

pub fn merge_branch(task_id: &str, parent: &str) -> String {
    format!("merge/{task_id}-to-{parent}")
}

pub fn reconcile_branch(task_id: &str) -> String {
    format!("reconcile/{task_id}")
}

/// Branches that must exist before a task branch is created, in creation
/// order (parents first), given `trunk` is already guaranteed to exist.
pub fn hierarchy_branches(
    strategy: &BranchingStrategy,
    context: &BranchContext,
) -> Vec<HierarchyBranch> {
    match strategy {
        BranchingStrategy::Flat => Vec::new(),
        BranchingStrategy::Prd => {
            let Some(prd) = &context.prd_id else {
                return Vec::new();
            };
            vec![HierarchyBranch {
                name: prd_branch(prd),
                parent: "main".to_string(),
            }]
        }
        BranchingStrategy::Epic => {
            let (Some(prd), Some(epic)) = (&context.prd_id, &context.epic_id) else {
                return Vec::new();
            };
            vec![
                HierarchyBranch {
                    name: prd_branch(prd),
                    parent: "main".to_string(),
                },
                HierarchyBranch {
                    name: epic_branch(prd, epic),
                    parent: prd_branch(prd),
                },
            ]
        }
    }
}

/// The immediate parent branch of the task branch, or `None` in flat mode
/// (where the parent is trunk itself, which is never synced).
pub fn immediate_parent(strategy: &BranchingStrategy, context: &BranchContext) -> Option<String> {
    match strategy {
        BranchingStrategy::Flat => None,
        BranchingStrategy::Prd => context.prd_id.as_ref().map(|prd| prd_branch(prd)),
        BranchingStrategy::Epic => match (&context.prd_id, &context.epic_id) {
            (Some(prd), Some(epic)) => Some(epic_branch(prd, epic)),
            _ => None,
        },
    }
}

/// The parent of `branch` one level further up the hierarchy, if any.
pub fn parent_of(
    strategy: &BranchingStrategy,
    context: &BranchContext,
    branch: &str,
) -> Option<String> {
    match strategy {
        BranchingStrategy::Flat => None,
        BranchingStrategy::Prd => None,
        BranchingStrategy::Epic => {
            let prd = context.prd_id.as_ref()?;
            if branch == epic_branch(prd, context.epic_id.as_ref()?) {
                Some(prd_branch(prd))
            } else {
                None
            }
        }
    }
}
