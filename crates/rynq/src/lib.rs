//! # rynq - FPGA accelerator hardware abstraction
//!
//! Host-side access to accelerators in programmable logic: register I/O,
//! bulk transfers between host buffers and device memory, and deferred
//! execution of both through dependency-ordered streams.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Hardware (MmioPlatform | VendorPlatform)                         │
//! │   └─ factories configured by serde parameter values              │
//! ├──────────────────────┬───────────────────────┬───────────────────┤
//! │ Accelerator          │ DataMover             │ ExecutionStream   │
//! │   register I/O       │   upload / download   │   drains an       │
//! │   start / stop       │   Memory allocation   │   ExecutionGraph  │
//! ├──────────────────────┴───────────────────────┴───────────────────┤
//! │ platform: RegisterBus, WindowMapper, DeviceMemory, VendorRuntime │
//! │   /dev/mem windows on Linux, simulated devices everywhere        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation of an accelerator or data mover can run immediately or
//! be enqueued on a graph ([`ExecutionType`]). Enqueued operations return a
//! [`NodeId`] that later operations can depend on; a stream issues nodes in
//! dependency order and reports an aggregate [`Status`].
//!
//! ## Example
//!
//! ```rust
//! use rynq::platform::{SimulatedMapper, SimulatedMemory};
//! use rynq::{AcceleratorParameters, Hardware, HardwareParameters, MmioPlatform};
//! use std::sync::Arc;
//!
//! # fn main() -> rynq::Result<()> {
//! let params = HardwareParameters::Mmio {
//!     bitstream: None,
//!     xclbin: "design.xclbin".to_string(),
//! };
//! let platform = MmioPlatform::new(
//!     &params,
//!     Arc::new(SimulatedMapper::new()),
//!     Arc::new(SimulatedMemory::new()),
//! )?;
//!
//! let accel = platform.accelerator(&AcceleratorParameters::mmio(0xA000_0000))?;
//! accel.write_value(0x10, 0xABu32)?;
//! assert_eq!(accel.read_value::<u32>(0x10)?, 0xAB);
//! # Ok(())
//! # }
//! ```

pub mod accelerator;
pub mod config;
pub mod datamover;
pub mod error;
pub mod graph;
pub mod hardware;
pub mod memory;
pub mod platform;
pub mod status;
pub mod types;

// Re-export primary types
pub use accelerator::{Accelerator, MmioAccelerator, RegisterBackend, VendorAccelerator};
pub use config::{AcceleratorParameters, DataMoverParameters, HardwareParameters, RynqConfig, StreamParameters};
pub use datamover::{DataMover, DmaDataMover, TransferBackend, TransferDirection, VendorDataMover};
pub use error::{Error, Result};
pub use graph::{ExecutionGraph, ExecutionStream, NodeId, NodeState, Operation, RegisterBuffer, StreamState};
pub use hardware::{DeviceInfo, Hardware, MmioPlatform, VendorPlatform};
pub use memory::{Memory, PinnedMemory};
pub use status::{ErrorCategory, Status, StatusCode};
pub use types::{DeviceAddress, DeviceStatus, ExecutionType, MemoryType, StartMode, Submission, SyncType};
