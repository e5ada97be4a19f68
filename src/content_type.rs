//! Content-Type lookup by object key extension

/// Content type for keys without a recognised extension.
///
/// Directory-style requests resolve to index documents, and pip expects
/// those as HTML.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

const CONTENT_TYPES: &[(&str, &str)] = &[
    (".whl", "application/octet-stream"),
    (".css", "text/css"),
    (".js", "text/javascript"),
    (".png", "image/png"),
];

/// Infer the Content-Type to serve for an object key
pub fn content_type_for(key: &str) -> &'static str {
    CONTENT_TYPES
        .iter()
        .find(|(ext, _)| key.ends_with(ext))
        .map(|(_, content_type)| *content_type)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}
