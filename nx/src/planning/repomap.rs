//! Repo map generation for evolution mode
//!
//! Walks an existing codebase and renders a compact file listing the LLM
//! can use as context. The output is budgeted in tokens (chars/4) so big
//! repositories degrade to a truncated map instead of blowing the prompt.

use std::path::Path;

use walkdir::WalkDir;

/// Directories never worth mapping
const SKIP_DIRS: &[&str] = &[
    ".git",
    ".nexus",
    "node_modules",
    "target",
    "dist",
    "build",
    ".venv",
    "__pycache__",
];

/// Approximate tokens for a string (chars/4)
fn approx_tokens(s: &str) -> usize {
    s.chars().count().div_ceil(4)
}

/// Render a repo map for `root`, staying under `token_budget` tokens.
/// Files are listed relative to root with sizes; deepest trees get cut
/// first because the walk is breadth-biased by depth sort.
pub fn generate_repo_map(root: &Path, token_budget: usize) -> String {
    let mut entries: Vec<(usize, String)> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !SKIP_DIRS.contains(&name.as_ref()) && !name.starts_with('.')
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(root).ok()?.display().to_string();
            let size = e.metadata().ok()?.len();
            Some((e.depth(), format!("{rel} ({size} bytes)")))
        })
        .collect();

    entries.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let header = format!("Repository map of {}:\n", root.display());
    let mut map = header;
    let mut truncated = false;

    for (_, line) in entries {
        let candidate = format!("{line}\n");
        if approx_tokens(&map) + approx_tokens(&candidate) > token_budget {
            truncated = true;
            break;
        }
        map.push_str(&candidate);
    }

    if truncated {
        map.push_str("... (map truncated to fit context budget)\n");
    }
    map
}

/// Prefix a feature description with repo context for evolution mode
pub fn format_evolution_context(repo_map: &str, feature_description: &str) -> String {
    format!(
        "You are modifying an existing codebase.\n\n{repo_map}\n\
         ---\n\n{feature_description}"
    )
}
