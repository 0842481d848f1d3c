//! Unified diff rendering for proposed file changes.
//!
//! Output follows the usual unified layout:
//! ```text
//! --- a/src/lib.rs
//! +++ b/src/lib.rs
//! @@ -start,count +start,count @@
//!  context line
//! -removed line
//! +added line
//! ```
//!
//! Lines are compared with their terminators, so a change to line endings
//! or to the final newline shows up as a hunk. A last line without `\n` is
//! followed by the `\ No newline at end of file` marker.

use crate::types::ChangeAction;

/// Unchanged lines kept around each change.
pub const CONTEXT_LINES: usize = 3;

const NO_NEWLINE: &str = "\n\\ No newline at end of file\n";

/// LCS table size above which the middle section is emitted as a full
/// delete followed by a full insert.
const MAX_TABLE_CELLS: usize = 4_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// Diff for one file change, labelled according to its action.
///
/// Creates diff from `/dev/null`, deletes diff to `/dev/null`.
pub fn file_diff(action: ChangeAction, path: &str, old: &str, new: &str) -> String {
    let (from, to) = match action {
        ChangeAction::Create => ("/dev/null".to_owned(), format!("b/{path}")),
        ChangeAction::Delete => (format!("a/{path}"), "/dev/null".to_owned()),
        ChangeAction::Modify => (format!("a/{path}"), format!("b/{path}")),
    };
    unified_diff(&from, &to, old, new, CONTEXT_LINES)
}

/// Render a unified diff between two texts. Identical inputs give `""`.
pub fn unified_diff(from: &str, to: &str, old: &str, new: &str, context: usize) -> String {
    if old == new {
        return String::new();
    }
    let old_lines: Vec<&str> = old.split_inclusive('\n').collect();
    let new_lines: Vec<&str> = new.split_inclusive('\n').collect();
    let ops = edit_script(&old_lines, &new_lines, MAX_TABLE_CELLS);

    let mut out = format!("--- {from}\n+++ {to}\n");
    render_hunks(&mut out, &old_lines, &new_lines, &ops, context);
    out
}

/// Shortest edit script via LCS, after peeling off the common prefix and suffix.
fn edit_script(old: &[&str], new: &[&str], max_cells: usize) -> Vec<Op> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let a = &old[prefix..old.len() - suffix];
    let b = &new[prefix..new.len() - suffix];

    let mut ops = vec![Op::Equal; prefix];
    ops.reserve(a.len() + b.len() + suffix);

    let width = b.len() + 1;
    let cells = (a.len() + 1).saturating_mul(width);
    if a.is_empty() || b.is_empty() || cells > max_cells {
        ops.extend(std::iter::repeat_n(Op::Delete, a.len()));
        ops.extend(std::iter::repeat_n(Op::Insert, b.len()));
    } else {
        // lcs[i * width + j] is the LCS length of a[i..] and b[j..].
        let mut lcs = vec![0u32; cells];
        for i in (0..a.len()).rev() {
            for j in (0..b.len()).rev() {
                lcs[i * width + j] = if a[i] == b[j] {
                    lcs[(i + 1) * width + j + 1] + 1
                } else {
                    lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
                };
            }
        }

        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            if a[i] == b[j] {
                ops.push(Op::Equal);
                i += 1;
                j += 1;
            } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
                ops.push(Op::Delete);
                i += 1;
            } else {
                ops.push(Op::Insert);
                j += 1;
            }
        }
        ops.extend(std::iter::repeat_n(Op::Delete, a.len() - i));
        ops.extend(std::iter::repeat_n(Op::Insert, b.len() - j));
    }

    ops.extend(std::iter::repeat_n(Op::Equal, suffix));
    ops
}

fn render_hunks(out: &mut String, old: &[&str], new: &[&str], ops: &[Op], context: usize) {
    // Line cursors before each op.
    let mut old_at = Vec::with_capacity(ops.len() + 1);
    let mut new_at = Vec::with_capacity(ops.len() + 1);
    let (mut o, mut n) = (0usize, 0usize);
    for op in ops {
        old_at.push(o);
        new_at.push(n);
        match op {
            Op::Equal => {
                o += 1;
                n += 1;
            }
            Op::Delete => o += 1,
            Op::Insert => n += 1,
        }
    }
    old_at.push(o);
    new_at.push(n);

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| **op != Op::Equal)
        .map(|(idx, _)| idx)
        .collect();

    let mut k = 0;
    while k < changes.len() {
        let start = changes[k].saturating_sub(context);
        let mut last = changes[k];
        k += 1;
        // Merge changes whose context windows touch.
        while k < changes.len() && changes[k] - last <= 2 * context + 1 {
            last = changes[k];
            k += 1;
        }
        let end = (last + 1 + context).min(ops.len());

        let old_count = old_at[end] - old_at[start];
        let new_count = new_at[end] - new_at[start];
        let old_start = if old_count == 0 { old_at[start] } else { old_at[start] + 1 };
        let new_start = if new_count == 0 { new_at[start] } else { new_at[start] + 1 };
        out.push_str(&format!(
            "@@ -{old_start},{old_count} +{new_start},{new_count} @@\n"
        ));

        for idx in start..end {
            let (sign, text) = match ops[idx] {
                Op::Equal => (' ', old[old_at[idx]]),
                Op::Delete => ('-', old[old_at[idx]]),
                Op::Insert => ('+', new[new_at[idx]]),
            };
            out.push(sign);
            out.push_str(text);
            if !text.ends_with('\n') {
                out.push_str(NO_NEWLINE);
            }
        }
    }
}
