//! `engine` crate — workflow definitions, graph construction, DAG validation,
//! the handler registry, and the sequential run loop.

pub mod builder;
pub mod dag;
pub mod error;
pub mod executor;
pub mod graph;
pub mod models;
pub mod registry;

pub use builder::{build_graph, BuiltGraph, DanglingEdge};
pub use dag::{topological_sort, validate_dag, TopoOrder};
pub use error::{CancelReason, EngineError};
pub use executor::{ExecutorConfig, RunReport, RunStatus, WorkflowExecutor};
pub use graph::Graph;
pub use models::{Connection, NodeDefinition, WorkflowDefinition};
pub use registry::NodeRegistry;

pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod executor_tests;
