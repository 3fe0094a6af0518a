//! Intent classification, the agent registry, and the route
//! dispatcher state machine.

pub mod classifier;
pub mod condition;
pub mod dispatcher;
pub mod node;
pub mod registry;
pub mod testing;

pub use classifier::LlmClassifier;
pub use dispatcher::{RouteDispatcher, TurnRequest, TurnResponse};
pub use node::{AgentNode, NodeOutcome};
pub use registry::AgentRegistry;
