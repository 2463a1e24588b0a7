//! Filesystem wildcard expansion for command arguments.

use glob::MatchOptions;
use tracing::trace;

const GLOB_CHARS: [char; 3] = ['*', '?', '['];

fn has_wildcard(token: &str) -> bool {
    token.contains(GLOB_CHARS)
}

/// Expand a single token, returning the sorted matches.
///
/// Returns `None` when the pattern is invalid or matches nothing.
fn expand_pattern(pattern: &str) -> Option<Vec<String>> {
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let paths = glob::glob_with(pattern, options).ok()?;
    let mut matches: Vec<String> = paths
        .filter_map(Result::ok)
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    if matches.is_empty() {
        return None;
    }
    matches.sort();
    Some(matches)
}

/// Expand every token containing `*`, `?` or `[` against the filesystem.
///
/// A pattern without matches is kept as written, the POSIX no-match rule.
/// Hidden entries only match when the pattern spells out the leading dot.
pub fn expand_globs(tokens: Vec<String>) -> Vec<String> {
    let mut expanded = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !has_wildcard(&token) {
            expanded.push(token);
            continue;
        }
        match expand_pattern(&token) {
            Some(matches) => {
                trace!(pattern = %token, count = matches.len(), "glob matched");
                expanded.extend(matches);
            }
            None => expanded.push(token),
        }
    }
    expanded
}
