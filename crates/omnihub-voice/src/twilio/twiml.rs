//! TwiML rendering and parsing.
//!
//! `render` is total over the IVR action set. `parse` covers the subset
//! we emit, so a rendered document round-trips back to the same actions.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use omnihub_channels::error::{ChannelError, Result};
use omnihub_channels::ivr::{DialTarget, GatherInput, IvrAction};

/// Render an IVR script to a TwiML document.
pub fn render(actions: &[IvrAction]) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;

    let root = BytesStart::new("Response");
    writer.write_event(Event::Start(root)).map_err(xml_err)?;
    for action in actions {
        write_action(&mut writer, action)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("Response")))
        .map_err(xml_err)?;

    Ok(writer.into_inner())
}

fn write_action(writer: &mut Writer<Vec<u8>>, action: &IvrAction) -> Result<()> {
    match action {
        IvrAction::Say {
            text,
            lang,
            voice,
            loop_count,
        } => {
            let mut el = BytesStart::new("Say");
            el.push_attribute(("language", lang.as_str()));
            if let Some(v) = voice {
                el.push_attribute(("voice", v.as_str()));
            }
            el.push_attribute(("loop", loop_count.to_string().as_str()));
            writer.write_event(Event::Start(el)).map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("Say")))
                .map_err(xml_err)?;
        }
        IvrAction::Play {
            url,
            loop_count,
            digits,
        } => {
            let mut el = BytesStart::new("Play");
            el.push_attribute(("loop", loop_count.to_string().as_str()));
            if let Some(d) = digits {
                el.push_attribute(("digits", d.as_str()));
            }
            writer.write_event(Event::Start(el)).map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(url)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("Play")))
                .map_err(xml_err)?;
        }
        IvrAction::Gather {
            input,
            timeout_secs,
            num_digits,
            finish_on_key,
            action_url,
            hints,
            nested,
        } => {
            let mut el = BytesStart::new("Gather");
            let input_attr = match input {
                GatherInput::Dtmf => "dtmf",
                GatherInput::Speech => "speech",
                GatherInput::DtmfSpeech => "dtmf speech",
            };
            el.push_attribute(("input", input_attr));
            el.push_attribute(("timeout", timeout_secs.to_string().as_str()));
            if let Some(n) = num_digits {
                el.push_attribute(("numDigits", n.to_string().as_str()));
            }
            if let Some(k) = finish_on_key {
                el.push_attribute(("finishOnKey", k.to_string().as_str()));
            }
            el.push_attribute(("action", action_url.as_str()));
            el.push_attribute(("method", "POST"));
            if !hints.is_empty() {
                el.push_attribute(("hints", hints.join(", ").as_str()));
            }
            writer.write_event(Event::Start(el)).map_err(xml_err)?;
            for inner in nested {
                write_action(writer, inner)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("Gather")))
                .map_err(xml_err)?;
        }
        IvrAction::Record {
            action_url,
            max_length_secs,
            play_beep,
            finish_on_key,
            transcribe,
        } => {
            let mut el = BytesStart::new("Record");
            if let Some(url) = action_url {
                el.push_attribute(("action", url.as_str()));
            }
            el.push_attribute(("maxLength", max_length_secs.to_string().as_str()));
            el.push_attribute(("playBeep", bool_attr(*play_beep)));
            if let Some(k) = finish_on_key {
                el.push_attribute(("finishOnKey", k.to_string().as_str()));
            }
            el.push_attribute(("transcribe", bool_attr(*transcribe)));
            writer.write_event(Event::Empty(el)).map_err(xml_err)?;
        }
        IvrAction::Dial {
            target,
            timeout_secs,
            caller_id,
            record,
        } => {
            let mut el = BytesStart::new("Dial");
            el.push_attribute(("timeout", timeout_secs.to_string().as_str()));
            if let Some(cid) = caller_id {
                el.push_attribute(("callerId", cid.as_str()));
            }
            if *record {
                el.push_attribute(("record", "record-from-answer"));
            }
            writer.write_event(Event::Start(el)).map_err(xml_err)?;
            match target {
                DialTarget::Number { number } => {
                    writer
                        .write_event(Event::Text(BytesText::new(number)))
                        .map_err(xml_err)?;
                }
                DialTarget::Sip { uri } => {
                    writer
                        .write_event(Event::Start(BytesStart::new("Sip")))
                        .map_err(xml_err)?;
                    writer
                        .write_event(Event::Text(BytesText::new(uri)))
                        .map_err(xml_err)?;
                    writer
                        .write_event(Event::End(BytesEnd::new("Sip")))
                        .map_err(xml_err)?;
                }
                DialTarget::Queue { name } => {
                    writer
                        .write_event(Event::Start(BytesStart::new("Queue")))
                        .map_err(xml_err)?;
                    writer
                        .write_event(Event::Text(BytesText::new(name)))
                        .map_err(xml_err)?;
                    writer
                        .write_event(Event::End(BytesEnd::new("Queue")))
                        .map_err(xml_err)?;
                }
            }
            writer
                .write_event(Event::End(BytesEnd::new("Dial")))
                .map_err(xml_err)?;
        }
        IvrAction::Hangup => {
            writer
                .write_event(Event::Empty(BytesStart::new("Hangup")))
                .map_err(xml_err)?;
        }
        IvrAction::Pause { length_secs } => {
            let mut el = BytesStart::new("Pause");
            el.push_attribute(("length", length_secs.to_string().as_str()));
            writer.write_event(Event::Empty(el)).map_err(xml_err)?;
        }
        IvrAction::Redirect { url, method } => {
            let mut el = BytesStart::new("Redirect");
            el.push_attribute(("method", method.as_str()));
            writer.write_event(Event::Start(el)).map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(url)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("Redirect")))
                .map_err(xml_err)?;
        }
        IvrAction::Queue { name, wait_url } => {
            let mut el = BytesStart::new("Enqueue");
            if let Some(url) = wait_url {
                el.push_attribute(("waitUrl", url.as_str()));
            }
            writer.write_event(Event::Start(el)).map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(name)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("Enqueue")))
                .map_err(xml_err)?;
        }
        IvrAction::Conference {
            name,
            muted,
            start_on_enter,
            end_on_exit,
            record,
            max_participants,
        } => {
            // Conferences join through Dial on Twilio.
            writer
                .write_event(Event::Start(BytesStart::new("Dial")))
                .map_err(xml_err)?;
            let mut el = BytesStart::new("Conference");
            el.push_attribute(("muted", bool_attr(*muted)));
            el.push_attribute(("startConferenceOnEnter", bool_attr(*start_on_enter)));
            el.push_attribute(("endConferenceOnExit", bool_attr(*end_on_exit)));
            if *record {
                el.push_attribute(("record", "record-from-start"));
            }
            if let Some(max) = max_participants {
                el.push_attribute(("maxParticipants", max.to_string().as_str()));
            }
            writer.write_event(Event::Start(el)).map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(name)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("Conference")))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("Dial")))
                .map_err(xml_err)?;
        }
    }
    Ok(())
}

fn bool_attr(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

fn xml_err(e: impl std::fmt::Display) -> ChannelError {
    ChannelError::Parse(format!("twiml: {e}"))
}

/// Parse a TwiML document back into IVR actions (the emitted subset).
pub fn parse(bytes: &[u8]) -> Result<Vec<IvrAction>> {
    let text = std::str::from_utf8(bytes).map_err(|e| xml_err(e))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut actions = Vec::new();
    let mut stack: Vec<PartialAction> = Vec::new();

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Eof => break,
            Event::Start(el) => {
                let name = String::from_utf8_lossy(el.name().as_ref()).to_string();
                if name == "Response" {
                    continue;
                }
                stack.push(PartialAction::from_element(&name, &el)?);
            }
            Event::Empty(el) => {
                let name = String::from_utf8_lossy(el.name().as_ref()).to_string();
                let partial = PartialAction::from_element(&name, &el)?;
                push_action(&mut actions, &mut stack, partial.finish()?);
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape().map_err(xml_err)?);
                }
            }
            Event::End(el) => {
                let name = String::from_utf8_lossy(el.name().as_ref()).to_string();
                if name == "Response" {
                    continue;
                }
                let partial = stack
                    .pop()
                    .ok_or_else(|| xml_err(format!("unbalanced </{name}>")))?;
                let action = partial.finish()?;
                push_action(&mut actions, &mut stack, action);
            }
            _ => {}
        }
    }

    Ok(actions)
}

fn push_action(actions: &mut Vec<IvrAction>, stack: &mut [PartialAction], action: IvrAction) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(action);
    } else {
        actions.push(action);
    }
}

/// An element under construction while parsing.
struct PartialAction {
    name: String,
    attrs: std::collections::HashMap<String, String>,
    text: String,
    children: Vec<IvrAction>,
}

impl PartialAction {
    fn from_element(name: &str, el: &BytesStart<'_>) -> Result<Self> {
        let mut attrs = std::collections::HashMap::new();
        for attr in el.attributes() {
            let attr = attr.map_err(xml_err)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = attr.unescape_value().map_err(xml_err)?.to_string();
            attrs.insert(key, value);
        }
        Ok(Self {
            name: name.to_string(),
            attrs,
            text: String::new(),
            children: Vec::new(),
        })
    }

    fn attr_u32(&self, key: &str, default: u32) -> u32 {
        self.attrs
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn finish(mut self) -> Result<IvrAction> {
        let text = self.text.trim().to_string();
        match self.name.as_str() {
            "Say" => Ok(IvrAction::Say {
                text,
                lang: self
                    .attrs
                    .remove("language")
                    .unwrap_or_else(|| "en-US".to_string()),
                voice: self.attrs.remove("voice"),
                loop_count: self.attr_u32("loop", 1),
            }),
            "Play" => Ok(IvrAction::Play {
                url: text,
                loop_count: self.attr_u32("loop", 1),
                digits: self.attrs.remove("digits"),
            }),
            "Gather" => {
                let input = match self.attrs.get("input").map(|s| s.as_str()) {
                    Some("speech") => GatherInput::Speech,
                    Some("dtmf speech") => GatherInput::DtmfSpeech,
                    _ => GatherInput::Dtmf,
                };
                Ok(IvrAction::Gather {
                    input,
                    timeout_secs: self.attr_u32("timeout", 5),
                    num_digits: self.attrs.get("numDigits").and_then(|v| v.parse().ok()),
                    finish_on_key: self
                        .attrs
                        .get("finishOnKey")
                        .and_then(|v| v.chars().next()),
                    action_url: self.attrs.remove("action").unwrap_or_default(),
                    hints: self
                        .attrs
                        .get("hints")
                        .map(|h| h.split(", ").map(|s| s.to_string()).collect())
                        .unwrap_or_default(),
                    nested: self.children,
                })
            }
            "Record" => Ok(IvrAction::Record {
                action_url: self.attrs.remove("action"),
                max_length_secs: self.attr_u32("maxLength", 300),
                play_beep: self.attrs.get("playBeep").map(|v| v == "true").unwrap_or(false),
                finish_on_key: self
                    .attrs
                    .get("finishOnKey")
                    .and_then(|v| v.chars().next()),
                transcribe: self
                    .attrs
                    .get("transcribe")
                    .map(|v| v == "true")
                    .unwrap_or(false),
            }),
            "Hangup" => Ok(IvrAction::Hangup),
            "Pause" => Ok(IvrAction::Pause {
                length_secs: self.attr_u32("length", 1),
            }),
            "Redirect" => Ok(IvrAction::Redirect {
                url: text,
                method: self
                    .attrs
                    .remove("method")
                    .unwrap_or_else(|| "POST".to_string()),
            }),
            "Enqueue" => Ok(IvrAction::Queue {
                name: text,
                wait_url: self.attrs.remove("waitUrl"),
            }),
            "Dial" => {
                // A Dial wrapping a Conference child collapses into the
                // conference action; otherwise the text is the number.
                if let Some(IvrAction::Conference { .. }) = self.children.first() {
                    return Ok(self.children.remove(0));
                }
                Ok(IvrAction::Dial {
                    target: DialTarget::Number { number: text },
                    timeout_secs: self.attr_u32("timeout", 30),
                    caller_id: self.attrs.remove("callerId"),
                    record: self.attrs.contains_key("record"),
                })
            }
            "Sip" | "Queue" => {
                // Children of Dial; represented as a Dial with the target.
                let target = if self.name == "Sip" {
                    DialTarget::Sip { uri: text }
                } else {
                    DialTarget::Queue { name: text }
                };
                Ok(IvrAction::Dial {
                    target,
                    timeout_secs: 30,
                    caller_id: None,
                    record: false,
                })
            }
            "Conference" => Ok(IvrAction::Conference {
                name: text,
                muted: self.attrs.get("muted").map(|v| v == "true").unwrap_or(false),
                start_on_enter: self
                    .attrs
                    .get("startConferenceOnEnter")
                    .map(|v| v == "true")
                    .unwrap_or(true),
                end_on_exit: self
                    .attrs
                    .get("endConferenceOnExit")
                    .map(|v| v == "true")
                    .unwrap_or(false),
                record: self.attrs.contains_key("record"),
                max_participants: self
                    .attrs
                    .get("maxParticipants")
                    .and_then(|v| v.parse().ok()),
            }),
            other => Err(xml_err(format!("unknown TwiML verb <{other}>"))),
        }
    }
}
