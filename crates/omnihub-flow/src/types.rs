use serde::{Deserialize, Serialize};

/// What starts a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowTrigger {
    /// Case-insensitive substring of the inbound message.
    Keyword,
    /// Equality with the context's classified intent name.
    Intent,
    /// Fires on a conversation with no prior history.
    Welcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Emit content, auto-advance.
    Message,
    /// Emit content, wait for the next user input.
    Question,
    /// Evaluate transitions against the last input, no emission.
    Condition,
    /// Emit optional content, surface side-effect actions, auto-advance.
    Action,
    /// Build a visual-render request from the node config, auto-advance.
    Vre,
    /// Emit content and finish the flow.
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCondition {
    /// Taken when nothing else matched; evaluated last regardless of
    /// position.
    Default,
    /// Case-insensitive equality with the trimmed user reply.
    ReplyEquals,
    /// Case-insensitive substring of the user reply.
    Contains,
    /// Regular-expression match over the user reply.
    Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub condition: TransitionCondition,
    #[serde(default)]
    pub value: String,
    pub to_node_id: String,
}

/// Side effect attached to an `action` node, applied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowAction {
    AddTag { tag: String },
    AssignUser { user_id: String },
    Escalate { reason: String },
    SetEntity { key: String, value: String },
}

/// VRE node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VreConfig {
    pub template_id: String,
    /// Values are templated with the same substitution rules as node
    /// content before being handed to the renderer.
    #[serde(default)]
    pub data_mapping: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub quick_replies: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub actions: Vec<FlowAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vre_config: Option<VreConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub tenant_id: String,
    pub trigger: FlowTrigger,
    #[serde(default)]
    pub trigger_value: String,
    pub start_node_id: String,
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Flow {
    pub fn node(&self, node_id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Structural validation: the start node must exist. Non-end nodes
    /// without transitions are legal (the engine loops them back).
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.node(&self.start_node_id).is_none() {
            return Err(format!(
                "start node '{}' is not among the flow's nodes",
                self.start_node_id
            ));
        }
        for node in &self.nodes {
            for t in &node.transitions {
                if self.node(&t.to_node_id).is_none() {
                    return Err(format!(
                        "node '{}' transitions to unknown node '{}'",
                        node.id, t.to_node_id
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_flow() -> Flow {
        Flow {
            id: "f1".to_string(),
            tenant_id: "t1".to_string(),
            trigger: FlowTrigger::Keyword,
            trigger_value: "menu".to_string(),
            start_node_id: "n0".to_string(),
            nodes: vec![FlowNode {
                id: "n0".to_string(),
                node_type: NodeType::End,
                content: "bye".to_string(),
                quick_replies: vec![],
                transitions: vec![],
                actions: vec![],
                vre_config: None,
            }],
            priority: 0,
            active: true,
        }
    }

    #[test]
    fn validation_requires_start_node() {
        let mut flow = minimal_flow();
        assert!(flow.validate().is_ok());
        flow.start_node_id = "missing".to_string();
        assert!(flow.validate().is_err());
    }

    #[test]
    fn validation_rejects_dangling_transitions() {
        let mut flow = minimal_flow();
        flow.nodes[0].transitions.push(Transition {
            condition: TransitionCondition::Default,
            value: String::new(),
            to_node_id: "nowhere".to_string(),
        });
        assert!(flow.validate().is_err());
    }

    #[test]
    fn node_type_serde_names() {
        let node: FlowNode = serde_json::from_str(
            r#"{"id":"n1","type":"question","content":"Name?"}"#,
        )
        .unwrap();
        assert_eq!(node.node_type, NodeType::Question);
        assert!(node.transitions.is_empty());
    }
}
