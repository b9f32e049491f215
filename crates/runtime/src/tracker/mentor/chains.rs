//! Outcome chains: classify the session's recent tool mix every tenth
//! call. Detects stuck loops (one tool dominating), edit churn (editing
//! far more than verifying) and healthy read/edit/test rhythms.

use crate::state::SessionState;

const STUCK_THRESHOLD: f64 = 0.7;
const CHURN_EDIT_RATIO: f64 = 0.6;
const MIN_CALLS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ChainVerdict {
    pub pattern: String,
    pub score: f64,
    pub message: String,
}

fn count(state: &SessionState, tools: &[&str]) -> u64 {
    tools
        .iter()
        .map(|t| state.tool_call_counts.get(*t).copied().unwrap_or(0))
        .sum()
}

/// Evaluate the tool mix; writes `mentor_chain_pattern`/`mentor_chain_score`
/// and returns the verdict. Fires only on every tenth call.
pub fn evaluate(state: &mut SessionState) -> Option<ChainVerdict> {
    if state.tool_call_count == 0 || state.tool_call_count % 10 != 0 {
        return None;
    }
    let total: u64 = state.tool_call_counts.values().sum();
    if total < MIN_CALLS {
        return None;
    }

    let mut pattern = String::new();
    let mut score = 0.7;
    let mut message = String::new();

    // Stuck loop: one tool dominates the window.
    if let Some((max_tool, max_count)) = state
        .tool_call_counts
        .iter()
        .max_by_key(|(_, count)| **count)
        .map(|(tool, count)| (tool.clone(), *count))
    {
        let ratio = max_count as f64 / total as f64;
        if ratio >= STUCK_THRESHOLD {
            pattern = "stuck".to_string();
            score = 0.2;
            message = format!(
                "Stuck loop: {max_tool} is {:.0}% of last {total} calls",
                ratio * 100.0
            );
        }
    }

    // Churn: heavy editing with little verification.
    if pattern.is_empty() {
        let edits = count(state, &["Edit", "Write", "NotebookEdit"]);
        let bash = count(state, &["Bash"]);
        if edits > 0 {
            let edit_ratio = edits as f64 / total as f64;
            if edit_ratio > CHURN_EDIT_RATIO && (bash as f64) < edits as f64 * 0.3 {
                pattern = "churn".to_string();
                score = 0.3;
                message = format!(
                    "Edit churn: {edits} edits vs {bash} bash calls (edit ratio {:.0}%)",
                    edit_ratio * 100.0
                );
            }
        }
    }

    // Healthy: balanced read/edit/test.
    if pattern.is_empty() {
        let reads = count(state, &["Read", "Grep", "Glob"]);
        let edits = count(state, &["Edit", "Write"]);
        let bash = count(state, &["Bash"]);
        if reads > 0
            && edits > 0
            && bash > 0
            && reads as f64 >= edits as f64 * 0.5
            && bash as f64 >= edits as f64 * 0.3
        {
            pattern = "healthy".to_string();
            score = 0.9;
            message = format!("Healthy pattern: {reads}R/{edits}E/{bash}T");
        }
    }

    state.mentor_chain_pattern = pattern.clone();
    state.mentor_chain_score = score;

    Some(ChainVerdict {
        pattern,
        score,
        message,
    })
}
