pub mod engine;
pub mod error;
pub mod store;
pub mod template;
pub mod types;

pub use engine::{FlowEngine, StepResult};
pub use error::{FlowError, Result};
pub use store::FlowStore;
pub use types::{Flow, FlowNode, FlowTrigger, NodeType, Transition, TransitionCondition};
