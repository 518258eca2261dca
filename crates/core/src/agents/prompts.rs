//! Default prompt templates bundled at compile time.
//!
//! Templates use `{{name}}` placeholders filled by [`render`].

/// Architecture agent - repository decomposition into components
pub const ARCHITECTURE: &str = include_str!("defaults/architecture.md");

/// Component agent - six-file memory bank for one component
pub const COMPONENT: &str = include_str!("defaults/component.md");

/// Validation agent - completeness/accuracy review with in-place fixes
pub const VALIDATION: &str = include_str!("defaults/validation.md");

/// Single-phase builder system prompt fallback
pub const MEMORY_BANK: &str = include_str!("defaults/memory_bank.md");

/// Single-phase builder task when writing a memory bank from scratch
pub const FULL_BUILD: &str = include_str!("defaults/full_build.md");

/// Single-phase builder task when a `git.diff` describes recent changes
pub const INCREMENTAL_UPDATE: &str = include_str!("defaults/incremental_update.md");

/// Appended to the task when an earlier attempt stopped early
pub const CONTINUATION: &str = include_str!("defaults/continuation.md");

/// All default prompts with their slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("architecture", ARCHITECTURE),
        ("component", COMPONENT),
        ("validation", VALIDATION),
        ("memory_bank", MEMORY_BANK),
        ("full_build", FULL_BUILD),
        ("incremental_update", INCREMENTAL_UPDATE),
        ("continuation", CONTINUATION),
    ]
}

/// Replace each `{{key}}` with its value. Unknown placeholders are left as-is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}
