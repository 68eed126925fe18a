//! Template message payloads, used when the 24h session window is shut.

use serde_json::{json, Value};

/// Build a `template` message object with a single body parameter set.
pub fn template_payload(name: &str, language: &str, body_params: &[String]) -> Value {
    let mut template = json!({
        "name": name,
        "language": { "code": language },
    });

    if !body_params.is_empty() {
        let parameters: Vec<Value> = body_params
            .iter()
            .map(|p| json!({ "type": "text", "text": p }))
            .collect();
        template["components"] = json!([{
            "type": "body",
            "parameters": parameters,
        }]);
    }

    template
}

/// Wrap the original outbound text into the channel's fallback template:
/// the text becomes the template's only body parameter.
pub fn session_fallback(name: &str, language: &str, original_text: &str) -> Value {
    template_payload(name, language, &[original_text.to_string()])
}
