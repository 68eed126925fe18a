//! AGI command rendering — plain-text command lines, one per action.

use omnihub_channels::error::Result;
use omnihub_channels::ivr::{DialTarget, IvrAction};

/// Render an IVR script to AGI commands.
pub fn render(actions: &[IvrAction]) -> Result<Vec<u8>> {
    let mut lines: Vec<String> = Vec::new();
    for action in actions {
        render_action(action, &mut lines);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    Ok(out.into_bytes())
}

fn render_action(action: &IvrAction, out: &mut Vec<String>) {
    match action {
        IvrAction::Say { text, .. } => {
            out.push(format!("SAY ALPHA \"{}\" \"\"", escape(text)));
        }
        IvrAction::Play { url, .. } => {
            out.push(format!("STREAM FILE {url} \"\""));
        }
        IvrAction::Gather {
            timeout_secs,
            num_digits,
            nested,
            ..
        } => {
            for inner in nested {
                render_action(inner, out);
            }
            out.push(format!(
                "WAIT FOR DIGIT {}",
                timeout_secs * 1000
            ));
            if let Some(n) = num_digits {
                if *n > 1 {
                    out.push(format!("GET DATA beep {} {}", timeout_secs * 1000, n));
                }
            }
        }
        IvrAction::Record {
            max_length_secs,
            play_beep,
            ..
        } => {
            let beep = if *play_beep { "BEEP" } else { "" };
            out.push(format!(
                "RECORD FILE recording wav # {} {beep}",
                max_length_secs * 1000
            ));
        }
        IvrAction::Dial {
            target,
            timeout_secs,
            ..
        } => {
            let dest = match target {
                DialTarget::Number { number } => format!("PJSIP/{number}"),
                DialTarget::Sip { uri } => format!("PJSIP/{uri}"),
                DialTarget::Queue { name } => {
                    out.push(format!("EXEC Queue \"{name}\""));
                    return;
                }
            };
            out.push(format!("EXEC Dial \"{dest},{timeout_secs}\""));
        }
        IvrAction::Hangup => out.push("HANGUP".to_string()),
        IvrAction::Pause { length_secs } => {
            out.push(format!("EXEC Wait \"{length_secs}\""));
        }
        IvrAction::Redirect { url, .. } => {
            out.push(format!("EXEC AGI \"{url}\""));
        }
        IvrAction::Queue { name, .. } => {
            out.push(format!("EXEC Queue \"{name}\""));
        }
        IvrAction::Conference { name, .. } => {
            out.push(format!("EXEC ConfBridge \"{name}\""));
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('"', "'")
}
