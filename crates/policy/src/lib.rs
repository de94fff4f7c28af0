//! Policy Gate — evaluates every tool call before it reaches a tool, and
//! scrubs sensitive text before it is logged or fed back to the model.

pub mod circuit;
pub mod gate;

pub use circuit::CircuitBreaker;
pub use gate::{PolicyDecision, PolicyGate};
