use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

use crate::error::ShareError;

/// Expands a shell-style pattern (`*` and `?` within one path component).
/// Matches come back sorted; an unreadable directory contributes nothing.
pub fn glob(pattern: &str) -> Result<Vec<Utf8PathBuf>, ShareError> {
    let (base, rest) = split_literal_prefix(Utf8Path::new(pattern));
    let mut matches = match rest {
        None => {
            if base.as_str().is_empty() || !base.exists() {
                Vec::new()
            } else {
                vec![base.clone()]
            }
        }
        Some(rest) => walk_matches(&base, &rest)?,
    };
    matches.sort();
    matches.dedup();
    tracing::debug!(pattern, found = matches.len(), "glob");
    Ok(matches)
}

/// Splits off the components before the first wildcard component.
fn split_literal_prefix(pattern: &Utf8Path) -> (Utf8PathBuf, Option<Utf8PathBuf>) {
    let mut base = Utf8PathBuf::new();
    let mut components = pattern.components();
    while let Some(component) = components.next() {
        let is_wildcard = matches!(component, Utf8Component::Normal(_))
            && component.as_str().contains(['*', '?']);
        if is_wildcard {
            let mut rest = Utf8PathBuf::from(component.as_str());
            let tail = components.as_path();
            if !tail.as_str().is_empty() {
                rest.push(tail);
            }
            return (base, Some(rest));
        }
        base.push(component.as_str());
    }
    (base, None)
}

fn walk_matches(base: &Utf8Path, rest: &Utf8Path) -> Result<Vec<Utf8PathBuf>, ShareError> {
    let parts = rest.components().map(|c| c.as_str().to_string()).collect::<Vec<_>>();
    let matcher = matcher(rest.as_str())?;
    let root = if base.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        base
    };

    let walker = WalkDir::new(root)
        .follow_links(true)
        .min_depth(parts.len())
        .max_depth(parts.len());

    let mut found = Vec::new();
    for entry in walker.into_iter().flatten() {
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Some(relative) = Utf8Path::from_path(relative) else {
            continue;
        };
        if !matcher.is_match(relative.as_std_path()) {
            continue;
        }
        // hidden entries only when the pattern component names the dot
        let hidden = relative
            .components()
            .zip(&parts)
            .any(|(name, part)| name.as_str().starts_with('.') && !part.starts_with('.'));
        if !hidden {
            found.push(base.join(relative));
        }
    }
    Ok(found)
}

fn matcher(pattern: &str) -> Result<GlobMatcher, ShareError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .backslash_escape(false)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|err| ShareError::InvalidPattern(err.to_string()))
}

pub fn file_name(path: &Utf8Path) -> &str {
    path.file_name().unwrap_or_default()
}
