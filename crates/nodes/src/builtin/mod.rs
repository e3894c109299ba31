//! Built-in node handlers.
//!
//! | tag          | handler              |
//! |--------------|----------------------|
//! | `start`      | [`StartNode`]        |
//! | `task`       | [`TaskNode`]         |
//! | `decision`   | [`DecisionNode`]     |
//! | `wait_event` | [`WaitEventNode`]    |
//! | `delay`      | [`DelayNode`]        |
//! | `template`   | [`TemplateNode`]     |

pub mod decision;
pub mod delay;
pub mod start;
pub mod task;
pub mod template;
pub mod wait_event;

pub use decision::DecisionNode;
pub use delay::DelayNode;
pub use start::StartNode;
pub use task::TaskNode;
pub use template::TemplateNode;
pub use wait_event::WaitEventNode;

pub const START: &str = "start";
pub const TASK: &str = "task";
pub const DECISION: &str = "decision";
pub const WAIT_EVENT: &str = "wait_event";
pub const DELAY: &str = "delay";
pub const TEMPLATE: &str = "template";
