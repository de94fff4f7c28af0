//! The agent runtime: session scheduling, cancellation, tool dispatch,
//! human-approval brokering, the Agent Loop turn state machine, and the
//! PDA executor for multi-step/multi-agent programs.

pub mod agent;
pub mod approval;
pub mod cancel;
pub mod dispatch;
pub mod events;
pub mod pda;
pub mod scheduler;
pub mod turn;

pub use agent::{run_agent, AgentManager};
pub use approval::{ApprovalBroker, ApprovalDecision};
pub use cancel::{CancelMap, CancelToken};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use events::EventBus;
pub use pda::PdaExecutor;
pub use scheduler::{ScheduledPermit, Scheduler};
pub use turn::{TurnOutcome, TurnRunner};
