//! Deterministic storage keys for normalised photos.
//!
//! A photo's key depends only on the case's path fragment, its case id and
//! its ordinal, so re-running a case overwrites the same objects instead of
//! leaving orphans behind:
//!
//! ```text
//! <url-path>/<case-id>/<safe-case-id>-<ordinal>.<ext>
//! ```
//!
//! `safe-case-id` is the sanitised case id with `.` replaced by `-`, so a
//! case id such as `2019.04` cannot produce a misleading double extension.

/// Restrict a storage key to `[A-Za-z0-9._/-]`.
///
/// Allowed character classes:
///
/// * ASCII letters `A–Z`, `a–z`
/// * ASCII digits `0–9`
/// * `.` `_` `-` inside names
/// * `/` as the segment separator
///
/// Everything else is removed, including control characters, whitespace,
/// and non-ASCII letters. Empty segments and the relative segments `.` and
/// `..` are dropped so the result can never climb out of its prefix or
/// start with a `/`.
pub fn sanitize_storage_key(input: &str) -> String {
    let filtered: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'))
        .collect();

    filtered
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Storage location of one photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetKey {
    /// Generated file name, e.g. `12345-1.jpg`.
    pub file_name: String,
    /// Full object key, e.g. `jane-doe/12345/12345-1.jpg`.
    pub storage_key: String,
}

/// Derive the storage key for the photo at `ordinal` (1-based).
pub fn asset_key(url_path: &str, case_id: &str, ordinal: usize, extension: &str) -> AssetKey {
    let path = sanitize_storage_key(url_path);
    let case_dir = sanitize_storage_key(&case_id.replace('/', ""));
    let safe_case_id = case_dir.replace('.', "-");
    let file_name = format!("{safe_case_id}-{ordinal}.{extension}");

    let storage_key = if path.is_empty() {
        format!("{case_dir}/{file_name}")
    } else {
        format!("{path}/{case_dir}/{file_name}")
    };

    AssetKey {
        file_name,
        storage_key,
    }
}

/// File name a photo had at its source, used for the `original_filename`
/// column. The query string is dropped and the result is sanitised.
pub fn original_filename(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let last = without_query.rsplit('/').next().unwrap_or(without_query);
    sanitize_storage_key(&last.replace('/', ""))
}
