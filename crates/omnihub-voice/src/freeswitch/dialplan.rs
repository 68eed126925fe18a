//! FreeSWITCH response rendering: a JSON list of `{application, data}`
//! dialplan steps.

use serde_json::{json, Value};

use omnihub_channels::error::{ChannelError, Result};
use omnihub_channels::ivr::{DialTarget, IvrAction};

pub fn render(actions: &[IvrAction]) -> Result<Vec<u8>> {
    let mut steps: Vec<Value> = Vec::new();
    for action in actions {
        render_action(action, &mut steps);
    }
    serde_json::to_vec(&steps).map_err(|e| ChannelError::Parse(format!("dialplan: {e}")))
}

fn step(application: &str, data: String) -> Value {
    json!({ "application": application, "data": data })
}

fn render_action(action: &IvrAction, out: &mut Vec<Value>) {
    match action {
        IvrAction::Say { text, lang, .. } => {
            let voice = if lang.starts_with("pt") {
                "ptBR"
            } else {
                "enUS"
            };
            out.push(step("speak", format!("flite|{voice}|{text}")));
        }
        IvrAction::Play { url, .. } => {
            out.push(step("playback", url.clone()));
        }
        IvrAction::Gather {
            timeout_secs,
            num_digits,
            nested,
            action_url,
            ..
        } => {
            for inner in nested {
                render_action(inner, out);
            }
            out.push(step(
                "play_and_get_digits",
                format!(
                    "1 {} 1 {} # silence_stream://250 ivr_digits {}",
                    num_digits.unwrap_or(1),
                    timeout_secs * 1000,
                    action_url
                ),
            ));
        }
        IvrAction::Record {
            max_length_secs, ..
        } => {
            out.push(step(
                "record_session",
                format!("$${{recordings_dir}}/${{uuid}}.wav {max_length_secs}"),
            ));
        }
        IvrAction::Dial {
            target,
            timeout_secs,
            ..
        } => {
            let dest = match target {
                DialTarget::Number { number } => format!("sofia/gateway/default/{number}"),
                DialTarget::Sip { uri } => format!("sofia/external/{uri}"),
                DialTarget::Queue { name } => {
                    out.push(step("callcenter", name.clone()));
                    return;
                }
            };
            out.push(step("set", format!("call_timeout={timeout_secs}")));
            out.push(step("bridge", dest));
        }
        IvrAction::Hangup => out.push(step("hangup", String::new())),
        IvrAction::Pause { length_secs } => {
            out.push(step("sleep", (length_secs * 1000).to_string()));
        }
        IvrAction::Redirect { url, .. } => {
            out.push(step("httapi", url.clone()));
        }
        IvrAction::Queue { name, .. } => {
            out.push(step("callcenter", name.clone()));
        }
        IvrAction::Conference { name, muted, .. } => {
            let flags = if *muted { "+flags{mute}" } else { "" };
            out.push(step("conference", format!("{name}{flags}")));
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
    fn say_play_hangup_map_to_applications() {
        let steps = rendered(&[
            IvrAction::say("Welcome"),
            IvrAction::play("https://cdn.example.com/a.wav"),
            IvrAction::Hangup,
        ]);
        assert_eq!(steps[0]["application"], "speak");
        assert_eq!(steps[1]["application"], "playback");
        assert_eq!(steps[1]["data"], "https://cdn.example.com/a.wav");
        assert_eq!(steps[2]["application"], "hangup");
    }

    #[test]
    fn dial_sets_timeout_then_bridges() {
        let steps = rendered(&[IvrAction::Dial {
            target: DialTarget::Number {
                number: "5511988887777".to_string(),
            },
            timeout_secs: 45,
            caller_id: None,
            record: false,
        }]);
        assert_eq!(steps[0]["application"], "set");
        assert_eq!(steps[0]["data"], "call_timeout=45");
        assert_eq!(steps[1]["application"], "bridge");
    }

    #[test]
    fn conference_carries_mute_flag() {
        let steps = rendered(&[IvrAction::Conference {
            name: "support".to_string(),
            muted: true,
            start_on_enter: true,
            end_on_exit: false,
            record: false,
            max_participants: None,
        }]);
        assert_eq!(steps[0]["data"], "support+flags{mute}");
    }
}
