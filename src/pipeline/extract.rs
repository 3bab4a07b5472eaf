//! Link extraction: pull photo URLs out of a stored HTML blob.
//!
//! Case pages are scraped as-is and are frequently truncated or malformed,
//! so this does not parse markup. It scans for any run of URL-ish
//! characters that ends in `.jpg` / `.jpeg` (optionally followed by a query
//! string), whether it sits in a `src` attribute, a CSS `url(...)`, an
//! `href`, or loose text.
//!
//! The returned order is significant: the position of a photo among the
//! successfully stored ones becomes its ordinal, and ordinal 1 is the
//! case's primary photo.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Candidate photo reference. Quotes, whitespace, angle brackets, `=`,
/// `;`, `,`, parentheses, braces and square brackets end a candidate, so
/// attribute syntax, `url(...)`, HTML entities and comma-separated lists
/// are never swallowed.
static RE_PHOTO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)[^\s"'<>=;,()\[\]{}\\]+\.jpe?g\b(?:\?[^\s"'<>#,]*)?"#).unwrap()
});

/// Characters trimmed from the end of a candidate after matching.
const TRAILING_JUNK: &[char] = &[']', '}', ')', '>', '\'', '"', ';', ':', ',', '.'];

/// Extract a deduplicated, first-seen-ordered list of absolute photo URLs.
///
/// Scheme-less references are completed against `base_origin`:
///
/// | Reference        | Result                         |
/// |------------------|--------------------------------|
/// | `https://h/a.jpg`| unchanged                      |
/// | `//h/a.jpg`      | `https://h/a.jpg`              |
/// | `/photos/a.jpg`  | `{origin}/photos/a.jpg`        |
/// | `../photos/a.jpg`| `{origin}/photos/a.jpg`        |
/// | `photos/a.jpg`   | `{origin}/photos/a.jpg`        |
///
/// An empty result is a valid outcome, not an error.
pub fn extract_image_urls(html: &str, base_origin: &str) -> Vec<String> {
    let origin = base_origin.trim_end_matches('/');
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for m in RE_PHOTO.find_iter(html) {
        let Some(url) = normalise(m.as_str(), origin) else {
            continue;
        };
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }

    urls
}

/// Clean one raw match and make it absolute.
fn normalise(raw: &str, origin: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned
        .trim()
        .trim_end_matches(|c: char| c.is_whitespace() || TRAILING_JUNK.contains(&c));

    if cleaned.is_empty() {
        return None;
    }

    let lower = cleaned.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(cleaned.to_string());
    }
    if let Some(rest) = cleaned.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    // A foreign scheme (data:, javascript:, ...) is not something we can fetch.
    if let Some((scheme, _)) = cleaned.split_once(':') {
        if !scheme.contains('/') {
            return None;
        }
    }

    let mut path = cleaned;
    loop {
        if let Some(rest) = path.strip_prefix("../") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else {
            break;
        }
    }
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return None;
    }

    Some(format!("{origin}/{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://charleyproject.org";

    #[test]
    fn extracts_img_src_in_document_order() {
        let html = r#"<p><img src="https://cdn.example.net/a.jpg"></p>
                      <img alt="x" src='/photos/b.JPG' />"#;
        assert_eq!(
            extract_image_urls(html, ORIGIN),
            vec![
                "https://cdn.example.net/a.jpg".to_string(),
                "https://charleyproject.org/photos/b.JPG".to_string(),
            ]
        );
    }

    #[test]
    fn duplicates_collapse_to_first_occurrence() {
        let html = r#"<img src="/p/photo.jpg"><a href="/p/photo.jpg">
                      <img src="/p/other.jpg"><img src="/p/photo.jpg">"#;
        assert_eq!(
            extract_image_urls(html, ORIGIN),
            vec![
                "https://charleyproject.org/p/photo.jpg".to_string(),
                "https://charleyproject.org/p/other.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn relative_forms_resolve_against_origin() {
        let html = "../up/a.jpg ./here/b.jpeg plain/c.jpg //cdn.host/d.jpg";
        assert_eq!(
            extract_image_urls(html, "https://origin.test/"),
            vec![
                "https://origin.test/up/a.jpg".to_string(),
                "https://origin.test/here/b.jpeg".to_string(),
                "https://origin.test/plain/c.jpg".to_string(),
                "https://cdn.host/d.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn survives_truncated_markup() {
        let html = r#"<div><img src="/photos/cut.jpg"#;
        assert_eq!(
            extract_image_urls(html, ORIGIN),
            vec!["https://charleyproject.org/photos/cut.jpg".to_string()]
        );
    }

    #[test]
    fn finds_references_outside_attributes() {
        let html = "style=\"background:url(/bg/hero.jpg)\" and see /photos/loose.jpg.";
        assert_eq!(
            extract_image_urls(html, ORIGIN),
            vec![
                "https://charleyproject.org/bg/hero.jpg".to_string(),
                "https://charleyproject.org/photos/loose.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn splits_comma_separated_lists() {
        let html = r#"<div data-gallery="/photos/a.jpg,/photos/b.jpg">
                      <img srcset="/photos/c.jpg?w=1,/photos/d.jpeg 2x">"#;
        assert_eq!(
            extract_image_urls(html, "https://o.test"),
            vec![
                "https://o.test/photos/a.jpg".to_string(),
                "https://o.test/photos/b.jpg".to_string(),
                "https://o.test/photos/c.jpg?w=1".to_string(),
                "https://o.test/photos/d.jpeg".to_string(),
            ]
        );
    }

    #[test]
    fn trailing_comma_is_not_part_of_the_url() {
        let html = "see https://h.test/a.jpg, then /photos/b.jpg?v=2,";
        assert_eq!(
            extract_image_urls(html, ORIGIN),
            vec![
                "https://h.test/a.jpg".to_string(),
                "https://charleyproject.org/photos/b.jpg?v=2".to_string(),
            ]
        );
    }

    #[test]
    fn keeps_query_string() {
        let html = r#"<img src="https://h.test/a.jpg?w=400&v=2">"#;
        assert_eq!(
            extract_image_urls(html, ORIGIN),
            vec!["https://h.test/a.jpg?w=400&v=2".to_string()]
        );
    }

    #[test]
    fn ignores_other_extensions_and_lookalikes() {
        let html = r#"<img src="/a.png"><img src="/b.gif"><a href="/c.jpgx">x</a>
                      <img src="/d.jpg_thumb">"#;
        assert!(extract_image_urls(html, ORIGIN).is_empty());
    }

    #[test]
    fn strips_control_characters() {
        let html = "<img src=\"/photos/a\u{0007}b.jpg\">";
        assert_eq!(
            extract_image_urls(html, ORIGIN),
            vec!["https://charleyproject.org/photos/ab.jpg".to_string()]
        );
    }

    #[test]
    fn skips_foreign_schemes() {
        let html = r#"<a href="javascript:open.jpg">x</a>"#;
        assert!(extract_image_urls(html, ORIGIN).is_empty());
    }

    #[test]
    fn empty_html_yields_nothing() {
        assert!(extract_image_urls("", ORIGIN).is_empty());
        assert!(extract_image_urls("<p>No photos on file.</p>", ORIGIN).is_empty());
    }
}
