//! NCCO (Call Control Object) rendering.
//!
//! Vonage has no explicit hangup (a finished NCCO hangs up implicitly)
//! and no pause verb; both degrade to their nearest equivalent.

use serde_json::{json, Value};

use omnihub_channels::error::Result;
use omnihub_channels::ivr::{DialTarget, GatherInput, IvrAction};

/// Render an IVR script to an NCCO action array.
pub fn render(actions: &[IvrAction]) -> Result<Vec<u8>> {
    let mut ncco: Vec<Value> = Vec::new();
    for action in actions {
        render_action(action, &mut ncco);
    }
    serde_json::to_vec(&ncco)
        .map_err(|e| omnihub_channels::error::ChannelError::Parse(format!("ncco: {e}")))
}

fn render_action(action: &IvrAction, out: &mut Vec<Value>) {
    match action {
        IvrAction::Say {
            text,
            lang,
            loop_count,
            ..
        } => {
            out.push(json!({
                "action": "talk",
                "text": text,
                "language": lang,
                "loop": loop_count,
            }));
        }
        IvrAction::Play {
            url, loop_count, ..
        } => {
            out.push(json!({
                "action": "stream",
                "streamUrl": [url],
                "loop": loop_count,
            }));
        }
        IvrAction::Gather {
            input,
            timeout_secs,
            num_digits,
            action_url,
            hints,
            nested,
            ..
        } => {
            // Prompts nested in the gather play before input collection.
            for inner in nested {
                render_action(inner, out);
            }
            let wants_dtmf = matches!(input, GatherInput::Dtmf | GatherInput::DtmfSpeech);
            let wants_speech = matches!(input, GatherInput::Speech | GatherInput::DtmfSpeech);
            let mut types = Vec::new();
            if wants_dtmf {
                types.push("dtmf");
            }
            if wants_speech {
                types.push("speech");
            }
            let mut input_obj = json!({
                "action": "input",
                "type": types,
                "eventUrl": [action_url],
            });
            if wants_dtmf {
                input_obj["dtmf"] = json!({
                    "timeOut": timeout_secs,
                    "maxDigits": num_digits.unwrap_or(1),
                });
            }
            if wants_speech {
                let mut speech = json!({ "endOnSilence": timeout_secs.min(&10) });
                if !hints.is_empty() {
                    speech["context"] = json!(hints);
                }
                input_obj["speech"] = speech;
            }
            out.push(input_obj);
        }
        IvrAction::Record {
            action_url,
            max_length_secs,
            play_beep,
            finish_on_key,
            ..
        } => {
            let mut rec = json!({
                "action": "record",
                "timeOut": max_length_secs,
                "beepStart": play_beep,
            });
            if let Some(url) = action_url {
                rec["eventUrl"] = json!([url]);
            }
            if let Some(k) = finish_on_key {
                rec["endOnKey"] = json!(k.to_string());
            }
            out.push(rec);
        }
        IvrAction::Dial {
            target,
            timeout_secs,
            caller_id,
            ..
        } => {
            let endpoint = match target {
                DialTarget::Number { number } => json!({ "type": "phone", "number": number }),
                DialTarget::Sip { uri } => json!({ "type": "sip", "uri": uri }),
                // No queue endpoint on Vonage; degrade to a named
                // conversation acting as the waiting room.
                DialTarget::Queue { name } => {
                    out.push(json!({ "action": "conversation", "name": name }));
                    return;
                }
            };
            let mut connect = json!({
                "action": "connect",
                "endpoint": [endpoint],
                "timeout": timeout_secs,
            });
            if let Some(cid) = caller_id {
                connect["from"] = json!(cid);
            }
            out.push(connect);
        }
        // Implicit: a finished NCCO ends the call.
        IvrAction::Hangup => {}
        // No pause verb; an empty talk of the same length approximates it
        // poorly, so the pause is simply dropped.
        IvrAction::Pause { .. } => {}
        IvrAction::Redirect { url, .. } => {
            out.push(json!({
                "action": "notify",
                "payload": {},
                "eventUrl": [url],
            }));
        }
        IvrAction::Queue { name, .. } => {
            out.push(json!({ "action": "conversation", "name": name }));
        }
        IvrAction::Conference {
            name,
            muted,
            start_on_enter,
            end_on_exit,
            record,
            ..
        } => {
            out.push(json!({
                "action": "conversation",
                "name": name,
                "mute": muted,
                "startOnEnter": start_on_enter,
                "endOnExit": end_on_exit,
                "record": record,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(actions: &[IvrAction]) -> Vec<Value> {
        serde_json::from_slice(&render(actions).unwrap()).unwrap()
    }

    #[test]
    fn say_becomes_talk() {
        let ncco = rendered(&[IvrAction::say_in("Olá", "pt-BR")]);
        assert_eq!(ncco.len(), 1);
        assert_eq!(ncco[0]["action"], "talk");
        assert_eq!(ncco[0]["text"], "Olá");
        assert_eq!(ncco[0]["language"], "pt-BR");
    }

    #[test]
    fn hangup_is_implicit() {
        let ncco = rendered(&[IvrAction::say("bye"), IvrAction::Hangup]);
        assert_eq!(ncco.len(), 1);
    }

    #[test]
    fn gather_emits_prompt_then_input() {
        let ncco = rendered(&[IvrAction::Gather {
            input: GatherInput::Dtmf,
            timeout_secs: 5,
            num_digits: Some(1),
            finish_on_key: None,
            action_url: "https://hub.example.com/voice/webhook".to_string(),
            hints: vec![],
            nested: vec![IvrAction::say("Press one")],
        }]);
        assert_eq!(ncco.len(), 2);
        assert_eq!(ncco[0]["action"], "talk");
        assert_eq!(ncco[1]["action"], "input");
        assert_eq!(ncco[1]["dtmf"]["maxDigits"], 1);
        assert_eq!(ncco[1]["eventUrl"][0], "https://hub.example.com/voice/webhook");
    }

    #[test]
    fn dial_becomes_connect() {
        let ncco = rendered(&[IvrAction::Dial {
            target: DialTarget::Number {
                number: "+5511988887777".to_string(),
            },
            timeout_secs: 25,
            caller_id: Some("+5511900001111".to_string()),
            record: false,
        }]);
        assert_eq!(ncco[0]["action"], "connect");
        assert_eq!(ncco[0]["endpoint"][0]["number"], "+5511988887777");
        assert_eq!(ncco[0]["from"], "+5511900001111");
    }

    #[test]
    fn conference_becomes_conversation() {
        let ncco = rendered(&[IvrAction::Conference {
            name: "support".to_string(),
            muted: true,
            start_on_enter: false,
            end_on_exit: true,
            record: true,
            max_participants: None,
        }]);
        assert_eq!(ncco[0]["action"], "conversation");
        assert_eq!(ncco[0]["mute"], true);
        assert_eq!(ncco[0]["startOnEnter"], false);
    }
}
