// ── Orchestra Atoms: Constants ──────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic strings,
// makes auditing easier, and keeps every layer self-documenting.

// ── Agent run-loop bounds (spec.md §4.3) ───────────────────────────────────
pub const MAX_TOOL_ITERATIONS: u32 = 25;

// ── Task scheduling bounds (spec.md §4.4) ──────────────────────────────────
pub const MAX_TASK_ATTEMPTS: u32 = 3;
pub const MAX_PLAN_ATTEMPTS: u32 = 3;

// ── Readiness deadlines (spec.md §5) ────────────────────────────────────────
pub const PROVIDER_READY_TIMEOUT_SECS: u64 = 5;
pub const EMBEDDER_READY_TIMEOUT_SECS: u64 = 5;

// ── File prefetch caps (spec.md §4.4 step 2) ───────────────────────────────
pub const MAX_PREFETCH_FILES: usize = 8;
pub const MAX_PREFETCH_FILE_BYTES: usize = 2_500;
pub const MAX_PREFETCH_TOTAL_BYTES: usize = 10_000;

// ── Dispatch-mode classification keywords (spec.md §4.3 step 3) ───────────
pub const TASK_MODE_KEYWORDS: &[&str] = &[
    "implement", "create", "fix", "refactor", "add", "build", "write", "delete", "update", "run",
];

// ── Plan persistence (spec.md §4.4, §6) ────────────────────────────────────
pub const PLAN_DIR: &str = ".orchestra/plans";
pub const PLAN_TITLE_MAX_CHARS: usize = 96;

// ── Read-only shell guard (spec.md §4.2) ───────────────────────────────────
pub const READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "pwd", "cat", "head", "tail", "wc", "find", "rg", "grep", "awk", "sed", "git",
];
pub const READ_ONLY_GIT_SUBCOMMANDS: &[&str] = &[
    "status", "log", "diff", "show", "grep", "branch", "remote", "rev-parse", "ls-files",
];
pub const DISALLOWED_SHELL_METACHARS: &[&str] = &[">", ">>", "|", ";", "&&", "||", "$(", "`"];

// ── HTTP retry (shared by provider adapters) ────────────────────────────────
pub const MAX_HTTP_RETRIES: u32 = 3;
pub const INITIAL_RETRY_DELAY_MS: u64 = 1_000;
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;
