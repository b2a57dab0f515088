use std::borrow::Cow;

/// Collapses every run of whitespace into a single space and trims the ends.
///
/// Text extracted from feed HTML or article pages carries the source's
/// indentation and line breaks; titles and descriptions are stored flat.
///
/// Returns `Cow::Borrowed` when the input is already in canonical form.
///
/// # Examples
///
/// ```
/// use press_ingest::util::collapse_whitespace;
///
/// assert_eq!(collapse_whitespace("  Breaking\n\t news  "), "Breaking news");
/// assert_eq!(collapse_whitespace("已经 整齐"), "已经 整齐");
/// ```
pub fn collapse_whitespace(s: &str) -> Cow<'_, str> {
    let mut prev_space = true;
    let canonical = s.chars().all(|c| {
        let ok = if c.is_whitespace() {
            !prev_space && c == ' '
        } else {
            true
        };
        prev_space = c.is_whitespace();
        ok
    }) && !s.ends_with(char::is_whitespace);

    if canonical {
        return Cow::Borrowed(s);
    }

    Cow::Owned(s.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Cleans a creator or category name for storage.
///
/// Control characters are removed, whitespace collapsed, and empty results
/// rejected with `None` so that a blank `<dc:creator>` never creates a row.
pub fn clean_name(s: &str) -> Option<String> {
    let without_controls: String = s.chars().filter(|c| !c.is_control() || *c == ' ').collect();
    let cleaned = collapse_whitespace(&without_controls);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_borrowed_when_clean() {
        assert!(matches!(collapse_whitespace("a b c"), Cow::Borrowed(_)));
        assert!(matches!(collapse_whitespace(""), Cow::Borrowed(_)));
    }

    #[test]
    fn test_collapse_runs_and_edges() {
        assert_eq!(collapse_whitespace(" a  b "), "a b");
        assert_eq!(collapse_whitespace("a\nb"), "a b");
        assert_eq!(collapse_whitespace("\t\t"), "");
    }

    #[test]
    fn test_clean_name_strips_controls() {
        assert_eq!(clean_name("路德\u{1b}社").as_deref(), Some("路德社"));
        assert_eq!(clean_name("  要闻 \n").as_deref(), Some("要闻"));
    }

    #[test]
    fn test_clean_name_rejects_blank() {
        assert_eq!(clean_name(""), None);
        assert_eq!(clean_name(" \t\n "), None);
        assert_eq!(clean_name("\u{0}\u{7}"), None);
    }
}
