use glob::{MatchOptions, Pattern};

/// `*` and `?` stay within one path segment; `**` spans segments.
const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Leading path prefixes of `path`, shortest first, ending with `path` itself.
/// `a/b/c` -> `a`, `a/b`, `a/b/c`
fn prefixes(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(move |(i, _)| &path[..i])
        .chain(std::iter::once(path))
}

fn normalize(pattern: &str) -> &str {
    let pattern = pattern.trim();
    let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
    pattern.trim_matches('/')
}

/// True if `path` matches `pattern` as a whole, or lies below a directory
/// that matches it (`docs` matches `docs/readme.md`).
pub fn matches(pattern: &str, path: &str) -> bool {
    let pattern = normalize(pattern);
    if pattern.is_empty() {
        return false;
    }

    match Pattern::new(pattern) {
        Ok(glob) => prefixes(path).any(|prefix| glob.matches_with(prefix, OPTIONS)),
        Err(err) => {
            // not a valid glob, compare literally
            tracing::debug!("invalid pattern {:?}: {}", pattern, err);
            prefixes(path).any(|prefix| prefix == pattern)
        }
    }
}

/// True if any pattern matches any path, or if there are no patterns at all.
///
/// This is a whole-change filter: a change touching one interesting file is
/// reported in full, including its uninteresting files.
pub fn any_match<P, Q>(patterns: &[P], paths: &[Q]) -> bool
where
    P: AsRef<str>,
    Q: AsRef<str>,
{
    if patterns.is_empty() {
        return true;
    }

    patterns.iter().any(|pattern| {
        paths
            .iter()
            .any(|path| matches(pattern.as_ref(), path.as_ref()))
    })
}
