//! Escalation rule evaluation. Rules run in order; the first match wins
//! and its rationale is surfaced to the caller.

use omnihub_core::types::{EscalationRule, Sentiment};

/// Phrases treated as an explicit request for a human.
const ESCALATION_KEYWORDS: &[&str] = &[
    "human",
    "agent",
    "attendant",
    "representative",
    "real person",
    "talk to someone",
    "atendente",
    "falar com humano",
];

/// Inputs the rules are evaluated against.
pub struct EscalationSignals<'a> {
    pub confidence: f64,
    pub default_threshold: f64,
    pub sentiment: Sentiment,
    pub message: &'a str,
    pub intent_name: Option<&'a str>,
}

/// Returns the first matching rule's rationale.
pub fn evaluate(rules: &[EscalationRule], signals: &EscalationSignals<'_>) -> Option<String> {
    let message_lower = signals.message.to_lowercase();
    for rule in rules {
        match rule {
            EscalationRule::LowConfidence { threshold } => {
                let threshold = threshold.unwrap_or(signals.default_threshold);
                if signals.confidence < threshold {
                    return Some(format!(
                        "confidence {:.2} below threshold {:.2}",
                        signals.confidence, threshold
                    ));
                }
            }
            EscalationRule::NegativeSentiment => {
                if signals.sentiment == Sentiment::Negative {
                    return Some("negative sentiment detected".to_string());
                }
            }
            EscalationRule::Keyword { keywords } => {
                if let Some(hit) = keywords
                    .iter()
                    .find(|k| !k.is_empty() && message_lower.contains(&k.to_lowercase()))
                {
                    return Some(format!("escalation keyword '{hit}' found"));
                }
            }
            EscalationRule::Intent { name } => {
                if signals.intent_name == Some(name.as_str()) {
                    return Some(format!("intent '{name}' requires a human"));
                }
            }
            EscalationRule::UserRequest => {
                if ESCALATION_KEYWORDS
                    .iter()
                    .any(|k| message_lower.contains(k))
                {
                    return Some("user asked for a human".to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(message: &str) -> EscalationSignals<'_> {
        EscalationSignals {
            confidence: 0.9,
            default_threshold: 0.5,
            sentiment: Sentiment::Neutral,
            message,
            intent_name: None,
        }
    }

    #[test]
    fn no_rules_never_escalates() {
        assert!(evaluate(&[], &signals("I hate everything")).is_none());
    }

    #[test]
    fn low_confidence_uses_rule_threshold_then_default() {
        let rules = vec![EscalationRule::LowConfidence { threshold: None }];
        let mut s = signals("hi");
        s.confidence = 0.4;
        assert!(evaluate(&rules, &s).is_some());
        s.confidence = 0.6;
        assert!(evaluate(&rules, &s).is_none());

        let rules = vec![EscalationRule::LowConfidence { threshold: Some(0.8) }];
        assert!(evaluate(&rules, &s).unwrap().contains("0.80"));
    }

    #[test]
    fn first_match_wins() {
        let rules = vec![
            EscalationRule::NegativeSentiment,
            EscalationRule::UserRequest,
        ];
        let mut s = signals("I want a human now");
        s.sentiment = Sentiment::Negative;
        let reason = evaluate(&rules, &s).unwrap();
        assert_eq!(reason, "negative sentiment detected");
    }

    #[test]
    fn keyword_and_intent_rules() {
        let rules = vec![EscalationRule::Keyword {
            keywords: vec!["refund".to_string()],
        }];
        assert!(evaluate(&rules, &signals("I demand a REFUND")).is_some());
        assert!(evaluate(&rules, &signals("all good")).is_none());

        let rules = vec![EscalationRule::Intent {
            name: "complaint".to_string(),
        }];
        let mut s = signals("this broke");
        s.intent_name = Some("complaint");
        assert!(evaluate(&rules, &s).is_some());
        s.intent_name = Some("praise");
        assert!(evaluate(&rules, &s).is_none());
    }

    #[test]
    fn user_request_detects_phrases() {
        let rules = vec![EscalationRule::UserRequest];
        assert!(evaluate(&rules, &signals("let me talk to someone")).is_some());
        assert!(evaluate(&rules, &signals("quero falar com humano")).is_some());
        assert!(evaluate(&rules, &signals("what are your hours?")).is_none());
    }
}
