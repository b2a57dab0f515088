use url::Url;

/// Query parameters that only carry campaign tracking and never change
/// which article a URL points at.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "spm"];

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Canonicalizes an article URL into the key used for cross-source matching.
///
/// The feed and the sitemap describe the same article with slightly different
/// strings (tracking parameters, a trailing slash, mixed-case hosts, lowercase
/// percent escapes from one source and uppercase from the other). Both sides
/// are passed through this function before any set operation or store lookup.
///
/// Rules applied, in order:
///
/// - surrounding whitespace is trimmed
/// - scheme and host are lowercased, default ports dropped (via [`Url`])
/// - the fragment is removed
/// - `utm_*`, `fbclid`, `gclid`, `mc_cid`, `mc_eid` and `spm` parameters are
///   removed; an empty query is dropped entirely
/// - trailing slashes are stripped unless the path is just `/`
/// - percent-escape hex digits in the path are uppercased
///
/// Input that is not an absolute http(s) URL is returned unchanged; such
/// values simply never match a stored link.
///
/// # Examples
///
/// ```
/// use press_ingest::util::normalize_link;
///
/// assert_eq!(
///     normalize_link("HTTPS://Example.com/2024/01/post/?utm_source=rss#top"),
///     "https://example.com/2024/01/post"
/// );
/// assert_eq!(normalize_link("not a url"), "not a url");
/// ```
pub fn normalize_link(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut url = match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => url,
        _ => return raw.to_string(),
    };

    url.set_fragment(None);

    // Filter raw segments; decoding and re-encoding would turn `%20` into `+`.
    if let Some(query) = url.query() {
        let kept: Vec<&str> = query
            .split('&')
            .filter(|segment| !segment.is_empty())
            .filter(|segment| {
                let key = segment.split_once('=').map_or(*segment, |(key, _)| key);
                !is_tracking_param(key)
            })
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            let rebuilt = kept.join("&");
            if rebuilt != query {
                url.set_query(Some(&rebuilt));
            }
        }
    }

    let path = url.path();
    let trimmed_path = path.trim_end_matches('/');
    let canonical_path = if trimmed_path.is_empty() {
        "/".to_string()
    } else {
        uppercase_percent_escapes(trimmed_path)
    };
    if canonical_path != path {
        url.set_path(&canonical_path);
    }

    url.to_string()
}

/// `%e4%b8%ad` and `%E4%B8%AD` name the same bytes; settle on uppercase.
fn uppercase_percent_escapes(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = String::with_capacity(path.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            out.push('%');
            out.push(bytes[i + 1].to_ascii_uppercase() as char);
            out.push(bytes[i + 2].to_ascii_uppercase() as char);
            i += 3;
        } else {
            let ch = path[i..].chars().next().unwrap_or_default();
            out.push(ch);
            i += ch.len_utf8().max(1);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_and_host_lowercased() {
        assert_eq!(
            normalize_link("HTTPS://Example.COM/a/b"),
            "https://example.com/a/b"
        );
    }

    #[test]
    fn test_trailing_slash_removed() {
        assert_eq!(
            normalize_link("https://example.com/2024/05/story/"),
            "https://example.com/2024/05/story"
        );
        assert_eq!(
            normalize_link("https://example.com/2024/05/story//"),
            "https://example.com/2024/05/story"
        );
    }

    #[test]
    fn test_root_path_kept() {
        assert_eq!(normalize_link("https://example.com"), "https://example.com/");
        assert_eq!(normalize_link("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn test_tracking_params_removed() {
        assert_eq!(
            normalize_link("https://example.com/a?utm_source=rss&utm_medium=feed"),
            "https://example.com/a"
        );
        assert_eq!(
            normalize_link("https://example.com/a?p=42&fbclid=xyz"),
            "https://example.com/a?p=42"
        );
    }

    #[test]
    fn test_stripping_tracking_keeps_query_encoding() {
        assert_eq!(
            normalize_link("https://x.com/a?q=a%20b&utm_source=rss"),
            normalize_link("https://x.com/a?q=a%20b")
        );
        assert_eq!(
            normalize_link("https://x.com/a?q=a%20b&utm_source=rss"),
            "https://x.com/a?q=a%20b"
        );
        assert_eq!(
            normalize_link("https://x.com/a?amp&utm_source=rss"),
            normalize_link("https://x.com/a?amp")
        );
        assert_eq!(normalize_link("https://x.com/a?amp"), "https://x.com/a?amp");
    }

    #[test]
    fn test_empty_query_segments_dropped() {
        assert_eq!(normalize_link("https://x.com/a?p=1&&lang=zh&"), "https://x.com/a?p=1&lang=zh");
        assert_eq!(normalize_link("https://x.com/a?"), "https://x.com/a");
    }

    #[test]
    fn test_meaningful_params_kept_in_order() {
        assert_eq!(
            normalize_link("https://example.com/?p=7&lang=zh"),
            "https://example.com/?p=7&lang=zh"
        );
    }

    #[test]
    fn test_fragment_removed() {
        assert_eq!(
            normalize_link("https://example.com/a#comments"),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_default_port_dropped() {
        assert_eq!(
            normalize_link("https://example.com:443/a"),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_percent_escapes_uppercased() {
        assert_eq!(
            normalize_link("https://example.com/%e8%a6%81%e9%97%bb/"),
            "https://example.com/%E8%A6%81%E9%97%BB"
        );
    }

    #[test]
    fn test_non_ascii_path_matches_escaped_form() {
        assert_eq!(
            normalize_link("https://example.com/要闻/"),
            normalize_link("https://example.com/%e8%a6%81%e9%97%bb")
        );
    }

    #[test]
    fn test_malformed_input_returned_unchanged() {
        assert_eq!(normalize_link("not a url"), "not a url");
        assert_eq!(normalize_link(""), "");
        assert_eq!(normalize_link("/relative/path"), "/relative/path");
    }

    #[test]
    fn test_non_http_scheme_returned_unchanged() {
        assert_eq!(normalize_link("mailto:editor@example.com"), "mailto:editor@example.com");
    }

    #[test]
    fn test_idempotent() {
        let once = normalize_link("https://Example.com/a/?utm_campaign=x&id=3#frag");
        assert_eq!(normalize_link(&once), once);
    }
}
