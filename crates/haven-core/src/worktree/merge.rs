//! Merge-into-trunk with mandatory dry-run conflict detection (§4.2, P4).

use super::{WorktreeError, WorktreeManager};
use crate::config::MergeStrategy;

#[derive(Debug, Clone)]
pub struct ConflictFile {
    pub path: String,
    pub conflict_type: String,
}

#[derive(Debug, Clone)]
pub struct MergeReport {
    pub source_branch: String,
    pub target_branch: String,
    pub dry_run: bool,
    pub can_merge: bool,
    pub conflicts: Vec<ConflictFile>,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

pub async fn merge_to(
    manager: &WorktreeManager,
    branch: &str,
    strategy: MergeStrategy,
    dry_run: bool,
) -> Result<MergeReport, WorktreeError> {
    let trunk = manager.trunk().to_string();
    let (files_changed, insertions, deletions) = diff_stats(manager, &trunk, branch).await?;

    let dry_run_output = manager
        .run_git(&["merge", "--no-commit", "--no-ff", branch])
        .await;
    // Always abort: a dry run must never leave the index in a merging state,
    // win or lose.
    let _ = manager.run_git(&["merge", "--abort"]).await;

    let conflicts = match &dry_run_output {
        Ok(_) => Vec::new(),
        Err(WorktreeError::GitFailed { detail }) => parse_conflicts(detail),
        Err(_) => Vec::new(),
    };
    // If the dry-run merge command itself failed for a non-conflict reason
    // (no detail matched a conflict marker), surface it as-is by falling
    // back to the diff-filter check against the working tree.
    let conflicts = if conflicts.is_empty() && dry_run_output.is_err() {
        detect_conflicts_via_diff(manager, &trunk, branch).await?
    } else {
        conflicts
    };

    let can_merge = conflicts.is_empty();

    if dry_run || !can_merge {
        return Ok(MergeReport {
            source_branch: branch.to_string(),
            target_branch: trunk,
            dry_run: true,
            can_merge,
            conflicts,
            files_changed,
            insertions,
            deletions,
        });
    }

    match strategy {
        MergeStrategy::Merge => {
            manager
                .run_git(&[
                    "merge",
                    "--no-ff",
                    branch,
                    "-m",
                    &format!("haven: merge {branch} into {trunk}"),
                ])
                .await?;
        }
        MergeStrategy::Squash => {
            manager.run_git(&["merge", "--squash", branch]).await?;
            manager
                .run_git(&["commit", "-m", &format!("haven: squash-merge {branch} into {trunk}")])
                .await?;
        }
        MergeStrategy::Rebase => {
            let task_id = branch.strip_prefix("task/").unwrap_or(branch);
            let wt_path = manager.worktree_path(task_id);
            manager.run_git_in(&wt_path, &["rebase", &trunk]).await?;
            manager.run_git(&["merge", "--ff-only", branch]).await?;
        }
    }

    Ok(MergeReport {
        source_branch: branch.to_string(),
        target_branch: trunk,
        dry_run: false,
        can_merge: true,
        conflicts: Vec::new(),
        files_changed,
        insertions,
        deletions,
    })
}

async fn diff_stats(
    manager: &WorktreeManager,
    trunk: &str,
    branch: &str,
) -> Result<(u32, u32, u32), WorktreeError> {
    let spec = format!("{trunk}...{branch}");
    let output = manager.run_git(&["diff", "--stat", &spec]).await?;
    Ok(parse_diff_stat(&output))
}

async fn detect_conflicts_via_diff(
    manager: &WorktreeManager,
    trunk: &str,
    branch: &str,
) -> Result<Vec<ConflictFile>, WorktreeError> {
    let spec = format!("{trunk}...{branch}");
    let output = manager
        .run_git(&["diff", "--name-only", "--diff-filter=U", &spec])
        .await
        .unwrap_or_default();
    Ok(output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|path| ConflictFile {
            path: path.trim().to_string(),
            conflict_type: "content".to_string(),
        })
        .collect())
}

fn parse_conflicts(stderr: &str) -> Vec<ConflictFile> {
    let mut conflicts = Vec::new();
    for line in stderr.lines() {
        if let Some(rest) = line.strip_prefix("CONFLICT (content): Merge conflict in ") {
            conflicts.push(ConflictFile {
                path: rest.trim().to_string(),
                conflict_type: "content".to_string(),
            });
        } else if let Some(rest) = line.strip_prefix("CONFLICT (rename/delete): ") {
            conflicts.push(ConflictFile {
                path: rest.trim().to_string(),
                conflict_type: "rename/delete".to_string(),
            });
        } else if let Some(rest) = line.strip_prefix("CONFLICT (modify/delete): ") {
            conflicts.push(ConflictFile {
                path: rest.trim().to_string(),
                conflict_type: "modify/delete".to_string(),
            });
        }
    }
    conflicts
}

/// Parse ` N files changed, M insertions(+), K deletions(-)` (any subset of
/// the three clauses may be absent).
fn parse_diff_stat(output: &str) -> (u32, u32, u32) {
    let Some(summary_line) = output.lines().last() else {
        return (0, 0, 0);
    };
    let mut files_changed = 0;
    let mut insertions = 0;
    let mut deletions = 0;

    for clause in summary_line.split(',') {
        let clause = clause.trim();
        let Some(number) = clause.split_whitespace().next().and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if clause.contains("file") {
            files_changed = number;
        } else if clause.contains("insertion") {
            insertions = number;
        } else if clause.contains("deletion") {
            deletions = number;
        }
    }
    (files_changed, insertions, deletions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_diff_stat_full_line() {
        let (f, i, d) = parse_diff_stat(" 3 files changed, 10 insertions(+), 2 deletions(-)");
        assert_eq!((f, i, d), (3, 10, 2));
    }

    #[test]
    fn parse_diff_stat_insertions_only() {
        let (f, i, d) = parse_diff_stat(" 1 file changed, 5 insertions(+)");
        assert_eq!((f, i, d), (1, 5, 0));
    }

    #[test]
    fn parse_diff_stat_empty_output() {
        assert_eq!(parse_diff_stat(""), (0, 0, 0));
    }

    #[test]
    fn parse_conflicts_extracts_content_conflict() {
        let stderr = "Auto-merging src/a.txt\nCONFLICT (content): Merge conflict in src/a.txt\nAutomatic merge failed";
        let conflicts = parse_conflicts(stderr);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].path, "src/a.txt");
        assert_eq!(conflicts[0].conflict_type, "content");
    }

    #[test]
    fn parse_conflicts_extracts_rename_delete() {
        let stderr = "CONFLICT (rename/delete): src/old.txt deleted in HEAD";
        let conflicts = parse_conflicts(stderr);
        assert_eq!(conflicts[0].conflict_type, "rename/delete");
    }
}
