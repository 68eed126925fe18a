//! Deterministic per-conversation flow execution.
//!
//! The engine never consults the AI: given the same flow, initial
//! context, and input sequence, the emitted messages and terminal state
//! are identical across runs.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use omnihub_context::ConversationContext;

use crate::error::{FlowError, Result};
use crate::store::FlowStore;
use crate::template::substitute;
use crate::types::{Flow, FlowAction, FlowNode, FlowTrigger, NodeType, Transition, TransitionCondition};

/// Chained node executions per step, bounding condition cycles.
const MAX_CHAIN: usize = 25;

/// One message emitted by a flow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMessage {
    pub content: String,
    pub quick_replies: Vec<String>,
}

/// Visual render request produced by a `vre` node.
#[derive(Debug, Clone, PartialEq)]
pub struct VreRequest {
    pub template_id: String,
    pub data: Value,
}

/// Outcome of starting or continuing a flow on one input.
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub messages: Vec<FlowMessage>,
    /// The flow stopped at a node awaiting user input.
    pub should_wait: bool,
    /// The flow reached an `end` node; flow state has been cleared.
    pub flow_ended: bool,
    pub is_vre_response: bool,
    pub vre_request: Option<VreRequest>,
    /// Side effects surfaced to the orchestrator (tagging, assignment,
    /// escalation).
    pub actions: Vec<FlowAction>,
}

pub struct FlowEngine {
    store: Arc<FlowStore>,
}

impl FlowEngine {
    pub fn new(store: Arc<FlowStore>) -> Self {
        Self { store }
    }

    pub fn has_active_flow(ctx: &ConversationContext) -> bool {
        ctx.state.is_active()
    }

    /// First trigger match in tenant priority order, if any.
    pub fn find_trigger(
        &self,
        tenant_id: &str,
        message: &str,
        ctx: &ConversationContext,
    ) -> Result<Option<Flow>> {
        let message_lower = message.to_lowercase();
        for flow in self.store.active_for_tenant(tenant_id)? {
            let hit = match flow.trigger {
                FlowTrigger::Keyword => {
                    !flow.trigger_value.is_empty()
                        && message_lower.contains(&flow.trigger_value.to_lowercase())
                }
                FlowTrigger::Intent => ctx
                    .intent
                    .as_ref()
                    .is_some_and(|i| i.name == flow.trigger_value),
                FlowTrigger::Welcome => ctx.is_fresh(),
            };
            if hit {
                debug!(flow_id = %flow.id, trigger = ?flow.trigger, "flow trigger matched");
                return Ok(Some(flow));
            }
        }
        Ok(None)
    }

    /// Activate a flow and execute from its start node.
    pub fn start_flow(&self, flow: &Flow, ctx: &mut ConversationContext) -> Result<StepResult> {
        flow.node(&flow.start_node_id)
            .ok_or_else(|| FlowError::MissingStart {
                flow_id: flow.id.clone(),
                node_id: flow.start_node_id.clone(),
            })?;

        ctx.state.active_flow_id = Some(flow.id.clone());
        ctx.state.current_node_id = Some(flow.start_node_id.clone());
        ctx.state.flow_started_at = Some(chrono::Utc::now());

        let mut result = StepResult::default();
        self.run_node(flow, &flow.start_node_id, ctx, None, &mut result, 0)?;
        Ok(result)
    }

    /// Feed one user input into the active flow.
    pub fn continue_flow(&self, ctx: &mut ConversationContext, input: &str) -> Result<StepResult> {
        let flow_id = ctx
            .state
            .active_flow_id
            .clone()
            .ok_or_else(|| FlowError::NotFound {
                id: "<no active flow>".to_string(),
            })?;

        let Some(flow) = self.store.get(&flow_id)? else {
            // The flow record was deleted underneath the conversation;
            // cancel cleanly so the caller falls through to the AI path.
            warn!(flow_id = %flow_id, "active flow vanished, clearing state");
            ctx.state.end_flow();
            return Err(FlowError::NotFound { id: flow_id });
        };

        let current_id = ctx
            .state
            .current_node_id
            .clone()
            .unwrap_or_else(|| flow.start_node_id.clone());
        let current = flow
            .node(&current_id)
            .ok_or_else(|| FlowError::MissingNode {
                flow_id: flow.id.clone(),
                node_id: current_id.clone(),
            })?;

        // A question's answer lands in collected_data under the node id.
        if current.node_type == NodeType::Question {
            ctx.state
                .collected_data
                .insert(current.id.clone(), input.trim().to_string());
        }

        let mut result = StepResult::default();
        match resolve_transition(current, input) {
            Some(t) => {
                let to = t.to_node_id.clone();
                self.run_node(&flow, &to, ctx, Some(input), &mut result, 0)?;
            }
            None => {
                // No transition matched: re-execute the current node.
                self.run_node(&flow, &current_id, ctx, Some(input), &mut result, 0)?;
                result.should_wait = true;
            }
        }
        Ok(result)
    }

    fn run_node(
        &self,
        flow: &Flow,
        node_id: &str,
        ctx: &mut ConversationContext,
        input: Option<&str>,
        result: &mut StepResult,
        depth: usize,
    ) -> Result<()> {
        if depth >= MAX_CHAIN {
            return Err(FlowError::ExecutionDepth {
                flow_id: flow.id.clone(),
                limit: MAX_CHAIN,
            });
        }
        let node = flow.node(node_id).ok_or_else(|| FlowError::MissingNode {
            flow_id: flow.id.clone(),
            node_id: node_id.to_string(),
        })?;
        ctx.state.current_node_id = Some(node.id.clone());

        match node.node_type {
            NodeType::Message => {
                emit(node, ctx, result);
                self.advance(flow, node, ctx, result, depth)
            }
            NodeType::Question => {
                emit(node, ctx, result);
                result.should_wait = true;
                Ok(())
            }
            NodeType::Condition => {
                // No emission; route on the (possibly empty) last input.
                match resolve_transition(node, input.unwrap_or_default()) {
                    Some(t) => {
                        let to = t.to_node_id.clone();
                        self.run_node(flow, &to, ctx, input, result, depth + 1)
                    }
                    None => {
                        result.should_wait = true;
                        Ok(())
                    }
                }
            }
            NodeType::Action => {
                if !node.content.is_empty() {
                    emit(node, ctx, result);
                }
                result.actions.extend(node.actions.iter().cloned());
                self.advance(flow, node, ctx, result, depth)
            }
            NodeType::Vre => {
                result.is_vre_response = true;
                if let Some(cfg) = &node.vre_config {
                    let mut data = serde_json::Map::new();
                    for (key, raw) in &cfg.data_mapping {
                        data.insert(key.clone(), Value::String(substitute(raw, ctx)));
                    }
                    result.vre_request = Some(VreRequest {
                        template_id: cfg.template_id.clone(),
                        data: Value::Object(data),
                    });
                } else {
                    warn!(node_id = %node.id, "vre node without vre_config");
                }
                self.advance(flow, node, ctx, result, depth)
            }
            NodeType::End => {
                if !node.content.is_empty() {
                    emit(node, ctx, result);
                }
                result.flow_ended = true;
                ctx.state.end_flow();
                Ok(())
            }
        }
    }

    /// Auto-advance: follow the first transition when it is
    /// unconditional; a node whose transitions are conditional emits and
    /// waits for the next input instead.
    fn advance(
        &self,
        flow: &Flow,
        node: &FlowNode,
        ctx: &mut ConversationContext,
        result: &mut StepResult,
        depth: usize,
    ) -> Result<()> {
        match node.transitions.first() {
            Some(t) if t.condition == TransitionCondition::Default => {
                let to = t.to_node_id.clone();
                self.run_node(flow, &to, ctx, None, result, depth + 1)
            }
            Some(_) => {
                result.should_wait = true;
                Ok(())
            }
            None => {
                // Loopback semantics: stay on this node awaiting input.
                result.should_wait = true;
                Ok(())
            }
        }
    }
}

fn emit(node: &FlowNode, ctx: &ConversationContext, result: &mut StepResult) {
    result.messages.push(FlowMessage {
        content: substitute(&node.content, ctx),
        quick_replies: node.quick_replies.clone(),
    });
}

/// Ordered transition matching; `default` is remembered and applied
/// last when nothing else matched.
fn resolve_transition<'a>(node: &'a FlowNode, input: &str) -> Option<&'a Transition> {
    let input = input.trim();
    let mut fallback: Option<&Transition> = None;
    for t in &node.transitions {
        match t.condition {
            TransitionCondition::Default => {
                if fallback.is_none() {
                    fallback = Some(t);
                }
            }
            TransitionCondition::ReplyEquals => {
                if input.eq_ignore_ascii_case(t.value.trim()) {
                    return Some(t);
                }
            }
            TransitionCondition::Contains => {
                if !t.value.is_empty()
                    && input.to_lowercase().contains(&t.value.to_lowercase())
                {
                    return Some(t);
                }
            }
            TransitionCondition::Regex => {
                if let Ok(re) = regex::Regex::new(&t.value) {
                    if re.is_match(input) {
                        return Some(t);
                    }
                }
            }
        }
    }
    fallback
}
