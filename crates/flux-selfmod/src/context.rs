//! Working tree summary sent to the model as project context.

use std::path::Path;

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::errors::Result;

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &["node_modules", "vendor", "dist", "target"];

/// Paths listed before the summary is cut short.
pub const MAX_TREE_ENTRIES: usize = 2000;

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

/// Sorted, `/`-separated paths of every regular file below `root`.
pub fn list_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "skipping unreadable tree entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            let parts: Vec<_> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect();
            files.push(parts.join("/"));
        }
    }
    files.sort();
    Ok(files)
}

/// Render the tree summary, one indented path per line.
pub fn render_tree(files: &[String]) -> String {
    let mut out = String::from("File tree:\n");
    for path in files.iter().take(MAX_TREE_ENTRIES) {
        out.push_str("  ");
        out.push_str(path);
        out.push('\n');
    }
    if files.len() > MAX_TREE_ENTRIES {
        out.push_str(&format!("  ... ({} more)\n", files.len() - MAX_TREE_ENTRIES));
    }
    out
}

/// List and render in one step.
pub fn tree_summary(root: &Path) -> Result<String> {
    Ok(render_tree(&list_files(root)?))
}
