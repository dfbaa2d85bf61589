// Orchestra Engine — re-exports the atoms data model so call sites can
// `use crate::engine::types::*;` uniformly, plus a few engine-local helpers
// that don't belong in the pure atoms layer.

pub use crate::atoms::types::*;

/// Case-insensitive keyword classification shared by the Agent run-loop
/// (spec.md §4.3 step 3) and the Orchestrator's top-level classification
/// (spec.md §4.4 "Classification"). Both consult the same heuristic so a
/// prompt is never task-mode in one place and chat-mode in the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Task,
    Chat,
}

pub fn classify_dispatch_mode(prompt: &str) -> DispatchMode {
    let lower = prompt.to_lowercase();
    if crate::atoms::constants::TASK_MODE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        DispatchMode::Task
    } else {
        DispatchMode::Chat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_task_keywords() {
        assert_eq!(classify_dispatch_mode("please implement a new parser"), DispatchMode::Task);
        assert_eq!(classify_dispatch_mode("FIX the bug in main.rs"), DispatchMode::Task);
        assert_eq!(classify_dispatch_mode("hi, how are you?"), DispatchMode::Chat);
    }
}
