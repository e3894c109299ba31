//! `nodes` crate — the `ExecutableNode` trait, the runtime node model, the
//! wait/rendezvous table, and the built-in node implementations.
//!
//! Every handler — built-in and integration alike — must implement
//! [`ExecutableNode`]. The engine crate dispatches execution through this
//! trait object.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod node;
pub mod traits;
pub mod value;
pub mod waiter;

pub use error::NodeError;
pub use node::{Node, NodeStatus, Payload};
pub use traits::{ExecutableNode, ExecutionContext, NodeOutcome};
pub use value::Truthiness;
pub use waiter::{Delivery, WaitError, Waiter, WaiterKey, WaiterTable};
