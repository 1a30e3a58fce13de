//! Dependency-ordered execution of register and transfer operations
//!
//! # Architecture
//!
//! ```text
//! ExecutionStream ── worker thread, one node in flight
//!     │ attached to
//!     ▼
//! ExecutionGraph
//! ├── nodes        - arena indexed by NodeId
//! ├── dependents   - adjacency lists, dependency → dependent
//! ├── remaining    - per-node count of unfinished dependencies
//! └── ready        - min-heap of ready ids
//! ```
//!
//! # Example
//!
//! ```rust
//! use rynq::graph::{ExecutionGraph, ExecutionStream};
//! use rynq::platform::SimulatedBus;
//! use rynq::{Accelerator, StreamParameters};
//! use std::sync::Arc;
//!
//! # fn main() -> rynq::Result<()> {
//! let accel = Accelerator::from_bus(Arc::new(SimulatedBus::new(0x100)));
//! let stream = ExecutionStream::new(ExecutionGraph::new(), StreamParameters::named("demo"))?;
//!
//! let write = accel.enqueue_write(stream.graph(), 0x10, &0xABu32.to_le_bytes(), &[])?;
//! let (_, value) = accel.enqueue_read(stream.graph(), 0x10, 4, &[write])?;
//!
//! assert!(stream.sync().is_ok());
//! assert_eq!(value.value::<u32>()?, 0xAB);
//! # Ok(())
//! # }
//! ```

mod dag;
mod node;
mod stream;

pub use dag::ExecutionGraph;
pub use node::{Node, NodeId, NodeState, Operation, RegisterBuffer};
pub use stream::{ExecutionStream, StreamState};
