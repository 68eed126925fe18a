//! `{{placeholder}}` substitution for node content and VRE data maps.
//!
//! `{{node_id}}` interpolates the answer collected at that node;
//! `{{entity.key}}` interpolates an extracted entity. Unknown
//! placeholders render as empty strings.

use std::sync::OnceLock;

use regex::Regex;

use omnihub_context::ConversationContext;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid regex"))
}

pub fn substitute(content: &str, ctx: &ConversationContext) -> String {
    placeholder_re()
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            if let Some(entity_key) = key.strip_prefix("entity.") {
                ctx.entities.get(entity_key).cloned().unwrap_or_default()
            } else {
                ctx.state
                    .collected_data
                    .get(key)
                    .cloned()
                    .unwrap_or_default()
            }
        })
        .into_owned()
}
