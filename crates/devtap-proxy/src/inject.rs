//! Instrumentation script injection
//!
//! HTML documents flowing back through the proxy get the instrumentation
//! script spliced in at the first available insertion point, tried in order:
//! before `</head>`, after `<head>`, after `<body ...>`, after `<html ...>`,
//! else prepended. Non-HTML bodies pass through untouched.

use once_cell::sync::Lazy;

/// The script tag spliced into HTML documents, built once
static SCRIPT_TAG: Lazy<String> =
    Lazy::new(|| format!("<script>{}</script>", include_str!("../assets/instrument.js")));

/// The script tag the proxy injects
pub fn script_tag() -> &'static str {
    &SCRIPT_TAG
}

/// The raw instrumentation script, for serving to the devtool panel
pub fn script_source() -> &'static str {
    include_str!("../assets/instrument.js")
}

/// Whether a content type should receive the instrumentation script
pub fn is_injectable(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.contains("text/html"))
}

/// Splice the instrumentation script into an HTML body
pub fn inject_script(body: &str) -> String {
    inject_at_first_point(body, script_tag())
}

fn inject_at_first_point(body: &str, script: &str) -> String {
    let lower = body.to_lowercase();

    // Before </head> is the preferred spot.
    if let Some(idx) = lower.find("</head>") {
        return splice(body, idx, script);
    }
    // After an opening <head ...> tag.
    if let Some(idx) = tag_end(&lower, "head") {
        return splice(body, idx, script);
    }
    // After an opening <body ...> tag.
    if let Some(idx) = tag_end(&lower, "body") {
        return splice(body, idx, script);
    }
    // After an opening <html ...> tag.
    if let Some(idx) = tag_end(&lower, "html") {
        return splice(body, idx, script);
    }
    // No recognizable structure: prepend.
    let mut out = String::with_capacity(body.len() + script.len());
    out.push_str(script);
    out.push_str(body);
    out
}

/// Index just past the `>` of an opening `<name ...>` tag
///
/// Requires the character after the tag name to be `>` or whitespace so that
/// `<head` never matches `<header`.
fn tag_end(lower: &str, name: &str) -> Option<usize> {
    let needle = format!("<{name}");
    let mut search_from = 0;
    while let Some(rel) = lower[search_from..].find(&needle) {
        let start = search_from + rel;
        let after = start + needle.len();
        match lower.as_bytes().get(after) {
            Some(b'>') => return Some(after + 1),
            Some(c) if c.is_ascii_whitespace() => {
                return lower[after..].find('>').map(|close| after + close + 1);
            }
            _ => search_from = after,
        }
    }
    None
}

fn splice(body: &str, at: usize, script: &str) -> String {
    let mut out = String::with_capacity(body.len() + script.len());
    out.push_str(&body[..at]);
    out.push_str(script);
    out.push_str(&body[at..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_before_head_close() {
        let body = "<html><head><title>x</title></head><body>y</body></html>";
        let out = inject_script(body);
        let script_at = out.find("<script>").expect("script");
        let head_close = out.find("</head>").expect("head close");
        assert!(script_at < head_close);
        assert!(out.ends_with("<body>y</body></html>"));
    }

    #[test]
    fn test_inject_after_head_open() {
        let body = "<html><head><title>x</title><body>y</body></html>";
        let out = inject_script(body);
        let head_open_end = out.find("<head>").expect("head") + "<head>".len();
        assert_eq!(out[head_open_end..].find("<script>"), Some(0));
    }

    #[test]
    fn test_inject_after_body_with_attributes() {
        let body = "<body class=\"app\" data-x=\"1\"><div>y</div></body>";
        let out = inject_script(body);
        let body_end = out.find('>').expect("tag end") + 1;
        assert!(out[body_end..].starts_with("<script>"));
    }

    #[test]
    fn test_inject_after_html_tag() {
        let body = "<html lang=\"en\"><div>no head or body</div></html>";
        let out = inject_script(body);
        let html_end = out.find('>').expect("tag end") + 1;
        assert!(out[html_end..].starts_with("<script>"));
    }

    #[test]
    fn test_prepend_for_fragment() {
        let body = "<div>bare fragment</div>";
        let out = inject_script(body);
        assert!(out.starts_with("<script>"));
        assert!(out.ends_with(body));
    }

    #[test]
    fn test_header_element_is_not_head() {
        let body = "<header>nav</header><div>x</div>";
        let out = inject_script(body);
        // No head/body/html tag: the script must be prepended, not spliced
        // into <header>.
        assert!(out.starts_with("<script>"));
    }

    #[test]
    fn test_injectable_content_types() {
        assert!(is_injectable(Some("text/html; charset=utf-8")));
        assert!(!is_injectable(Some("application/json")));
        assert!(!is_injectable(None));
    }
}
