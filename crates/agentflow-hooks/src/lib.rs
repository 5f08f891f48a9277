//! agentflow-hooks: Scheduler event hooks.
//!
//! Hooks respond to scheduler lifecycle events (start/stop, task dispatch,
//! completion, failure) so a hosting application can surface them.

pub mod events;
pub mod registry;

pub use events::SchedulerEvent;
pub use registry::{HookHandler, HookRegistry};
