//! Hardware lifecycle and object factories
//!
//! A [`Hardware`] implementation owns the transports of one device and hands
//! out accelerators, data movers and execution streams configured by
//! parameter values.
//!
//! ```text
//! Hardware
//! ├── MmioPlatform   - embedded programmable logic (WindowMapper + DeviceMemory)
//! └── VendorPlatform - PCIe card (VendorRuntime + DeviceMemory)
//! ```

mod mmio;
mod vendor;

pub use mmio::MmioPlatform;
pub use vendor::VendorPlatform;

use crate::accelerator::Accelerator;
use crate::config::{AcceleratorParameters, DataMoverParameters, StreamParameters};
use crate::datamover::DataMover;
use crate::error::Result;
use crate::graph::{ExecutionGraph, ExecutionStream};
use serde::{Deserialize, Serialize};

/// Identity and clock rates of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    /// Stable identifier (board serial, container UUID, ...)
    pub identity: String,
    /// Clock rates in MHz
    #[serde(default)]
    pub clocks_mhz: Vec<f64>,
}

/// A programmable-logic device
pub trait Hardware: Send + Sync {
    /// Return the device to its freshly configured state
    fn reset(&self) -> Result<()>;

    fn query(&self) -> Result<DeviceInfo>;

    /// Open an accelerator; parameters of another backend are rejected
    /// with [`Error::IncompatibleParameter`](crate::Error::IncompatibleParameter)
    fn accelerator(&self, parameters: &AcceleratorParameters) -> Result<Accelerator>;

    /// Open a data mover; parameters of another backend are rejected
    /// with [`Error::IncompatibleParameter`](crate::Error::IncompatibleParameter)
    fn data_mover(&self, parameters: &DataMoverParameters) -> Result<DataMover>;

    /// New stream attached to a new, empty graph
    fn execution_stream(&self, name: &str) -> Result<ExecutionStream> {
        ExecutionStream::new(ExecutionGraph::new(), StreamParameters::named(name))
    }
}
