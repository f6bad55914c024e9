//! URL slugs for game records.

use regex::Regex;
use std::sync::OnceLock;

/// Slug used when nothing sluggable is left.
pub const FALLBACK_SLUG: &str = "game";

fn separator_pattern() -> Option<&'static Regex> {
    static SEPARATORS: OnceLock<Option<Regex>> = OnceLock::new();
    SEPARATORS
        .get_or_init(|| Regex::new(r"[^a-z0-9]+").ok())
        .as_ref()
}

/// Lower-case ASCII slug: runs of anything outside `[a-z0-9]` collapse to a
/// single `-`, leading and trailing dashes are trimmed.
///
/// Returns `None` when the input has no ASCII alphanumerics.
pub fn slugify(text: &str) -> Option<String> {
    let lowered = text.trim().to_lowercase();
    let slug = match separator_pattern() {
        Some(re) => re.replace_all(&lowered, "-").into_owned(),
        None => lowered
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-"),
    };
    let slug = slug.trim_matches('-');
    (!slug.is_empty()).then(|| slug.to_string())
}

/// Slug from the first candidate that produces one, else [`FALLBACK_SLUG`].
pub fn slug_for<'a>(candidates: impl IntoIterator<Item = &'a str>) -> String {
    candidates
        .into_iter()
        .find_map(slugify)
        .unwrap_or_else(|| FALLBACK_SLUG.to_string())
}
