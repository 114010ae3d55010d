//! Prompt text sent alongside the task graph schema.

use crate::core::{Node, TaskGraphSnapshot};
use crate::error::Result;

/// Instructions shared by planning and re-planning requests.
pub const SYSTEM_PROMPT: &str = "You are a planning assistant that decomposes goals into task graphs.\n\
Respond with a single JSON object matching the task_graph schema and no other text.\n\
Each entry in `nodes` is keyed by a short identifier that must equal the node's `id`.\n\
Every node must have a non-empty `description` and status `pending`.\n\
Edges go from `source` to `target`. Use `hard` when the target cannot start before the \
source is completed and `soft` for advisory ordering. Hard edges must never form a cycle.\n\
Use `inputs`, `outputs`, and `data_transfer` for data the tasks exchange; \
an optional numeric `cost` in `inputs` estimates the task's effort.";

/// User prompt for decomposing a fresh goal.
pub fn plan_prompt(goal: &str, max_tasks: usize) -> String {
    format!(
        "Decompose the following goal into a task graph. \
Do not generate more than {max_tasks} tasks.\n\n\
Goal: {goal}\n\n\
Output: task_graph JSON only."
    )
}

/// User prompt asking for additional work around failed tasks.
///
/// The current graph is embedded as snapshot JSON. New node keys must not
/// reuse existing ids; edges may point at existing ids to anchor the new work.
pub fn replan_prompt(
    snapshot: &TaskGraphSnapshot,
    failures: &[&Node],
    max_tasks: usize,
) -> Result<String> {
    let graph = snapshot.to_json_pretty()?;
    let mut failed = String::new();
    for node in failures {
        failed.push_str(&format!("- {}: {}\n", node.id, node.description));
        if let Some(outputs) = &node.outputs {
            failed.push_str(&format!(
                "  outputs: {}\n",
                serde_json::to_string(outputs)?
            ));
        }
    }

    Ok(format!(
        "The following tasks failed while executing the task graph below.\n\n\
Failed tasks:\n{failed}\n\
Current task graph:\n{graph}\n\n\
Propose only the additional tasks needed to recover, at most {max_tasks}. \
Return a task_graph containing just the new nodes and the edges that involve them. \
New node keys must not reuse any id already in the graph. \
Edges may reference existing node ids to connect the new tasks to the current graph.\n\n\
Output: task_graph JSON only."
    ))
}
