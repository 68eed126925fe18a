pub mod health;
pub mod voice;
pub mod whatsapp;

use std::collections::HashMap;

use axum::http::HeaderMap;

/// Flatten HTTP headers for the adapters, inserting every header under
/// both its original and lowercased name so lookups match either
/// spelling.
pub fn webhook_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            out.insert(name.as_str().to_string(), v.to_string());
            out.insert(name.as_str().to_lowercase(), v.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn headers_carry_both_spellings() {
        let mut headers = HeaderMap::new();
        headers.insert("x-hub-signature-256", HeaderValue::from_static("sha256=aa"));
        let map = webhook_headers(&headers);
        assert_eq!(map["x-hub-signature-256"], "sha256=aa");
        // HeaderMap lowercases names; both keys land on the same value.
        assert!(map.contains_key("x-hub-signature-256"));
    }
}
