//! Provider-independent IVR action set.
//!
//! Each voice adapter owns a total render function over these variants;
//! a provider that lacks a variant degrades to its nearest equivalent.

use serde::{Deserialize, Serialize};

/// What a `Gather` listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatherInput {
    Dtmf,
    Speech,
    DtmfSpeech,
}

/// Destination of a `Dial`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DialTarget {
    Number { number: String },
    Sip { uri: String },
    Queue { name: String },
}

/// One step of an IVR script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IvrAction {
    Say {
        text: String,
        #[serde(default = "default_lang")]
        lang: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
        #[serde(default = "default_loop")]
        loop_count: u32,
    },
    Play {
        url: String,
        #[serde(default = "default_loop")]
        loop_count: u32,
        /// DTMF digits to send after playback, when supported.
        #[serde(skip_serializing_if = "Option::is_none")]
        digits: Option<String>,
    },
    Gather {
        input: GatherInput,
        #[serde(default = "default_timeout")]
        timeout_secs: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        num_digits: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_on_key: Option<char>,
        /// Where the provider posts the gathered input.
        action_url: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        hints: Vec<String>,
        /// Prompts executed while listening.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        nested: Vec<IvrAction>,
    },
    Record {
        #[serde(skip_serializing_if = "Option::is_none")]
        action_url: Option<String>,
        #[serde(default = "default_record_max")]
        max_length_secs: u32,
        #[serde(default)]
        play_beep: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_on_key: Option<char>,
        #[serde(default)]
        transcribe: bool,
    },
    Dial {
        target: DialTarget,
        #[serde(default = "default_dial_timeout")]
        timeout_secs: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        caller_id: Option<String>,
        #[serde(default)]
        record: bool,
    },
    Hangup,
    Pause {
        #[serde(default = "default_pause")]
        length_secs: u32,
    },
    Redirect {
        url: String,
        #[serde(default = "default_method")]
        method: String,
    },
    Queue {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        wait_url: Option<String>,
    },
    Conference {
        name: String,
        #[serde(default)]
        muted: bool,
        #[serde(default = "default_true")]
        start_on_enter: bool,
        #[serde(default)]
        end_on_exit: bool,
        #[serde(default)]
        record: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_participants: Option<u32>,
    },
}

impl IvrAction {
    /// Convenience constructor for the most common action.
    pub fn say(text: impl Into<String>) -> Self {
        IvrAction::Say {
            text: text.into(),
            lang: default_lang(),
            voice: None,
            loop_count: 1,
        }
    }

    pub fn say_in(text: impl Into<String>, lang: impl Into<String>) -> Self {
        IvrAction::Say {
            text: text.into(),
            lang: lang.into(),
            voice: None,
            loop_count: 1,
        }
    }

    pub fn play(url: impl Into<String>) -> Self {
        IvrAction::Play {
            url: url.into(),
            loop_count: 1,
            digits: None,
        }
    }

    pub fn pause(length_secs: u32) -> Self {
        IvrAction::Pause { length_secs }
    }
}

fn default_lang() -> String {
    "en-US".to_string()
}
fn default_loop() -> u32 {
    1
}
fn default_timeout() -> u32 {
    5
}
fn default_record_max() -> u32 {
    300
}
fn default_dial_timeout() -> u32 {
    30
}
fn default_pause() -> u32 {
    1
}
fn default_method() -> String {
    "POST".to_string()
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_tags_actions_by_name() {
        let json = serde_json::to_value(IvrAction::say("hello")).unwrap();
        assert_eq!(json["action"], "say");
        assert_eq!(json["text"], "hello");
        assert_eq!(json["lang"], "en-US");

        let back: IvrAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, IvrAction::say("hello"));
    }

    #[test]
    fn dial_target_variants() {
        let dial = IvrAction::Dial {
            target: DialTarget::Sip {
                uri: "sip:agent@pbx.example.com".to_string(),
            },
            timeout_secs: 30,
            caller_id: None,
            record: false,
        };
        let json = serde_json::to_value(&dial).unwrap();
        assert_eq!(json["target"]["kind"], "sip");
    }
}
