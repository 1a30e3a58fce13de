//! Backend selection parameters
//!
//! Every parameter type is a plain serde value. Enums are tagged by a
//! `backend` field:
//!
//! ```json
//! {
//!   "hardware": { "backend": "mmio", "xclbin": "design.xclbin" },
//!   "accelerators": {
//!     "matmul": { "backend": "mmio", "base_address": 2684354560 }
//!   },
//!   "data_movers": {
//!     "dma0": { "backend": "dma", "base_address": 2684420096 }
//!   },
//!   "streams": [{ "name": "main" }]
//! }
//! ```

use crate::accelerator::DEFAULT_REGISTER_WIDTH;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "RYNQ_CONFIG";

/// Register windows start on a word boundary
pub const REGISTER_ALIGNMENT: u64 = 4;

/// Register window mapped for an MMIO accelerator when none is given
pub const DEFAULT_WINDOW_SIZE: u64 = 0x1_0000;

fn default_window_size() -> u64 {
    DEFAULT_WINDOW_SIZE
}

fn default_register_width() -> usize {
    DEFAULT_REGISTER_WIDTH
}

/// Selects and configures an accelerator backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum AcceleratorParameters {
    /// Memory-mapped accelerator at a physical address
    Mmio {
        base_address: u64,
        #[serde(default = "default_window_size")]
        window_size: u64,
        #[serde(default = "default_register_width")]
        register_width: usize,
    },
    /// Kernel of a vendor-runtime card
    Vendor {
        #[serde(default)]
        device: u32,
        kernel: String,
    },
}

impl AcceleratorParameters {
    /// MMIO accelerator with the default window and register width
    pub fn mmio(base_address: u64) -> Self {
        Self::Mmio {
            base_address,
            window_size: DEFAULT_WINDOW_SIZE,
            register_width: DEFAULT_REGISTER_WIDTH,
        }
    }

    /// Kernel `kernel` on card 0
    pub fn vendor(kernel: impl Into<String>) -> Self {
        Self::Vendor {
            device: 0,
            kernel: kernel.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Mmio {
                base_address,
                window_size,
                register_width,
            } => {
                if base_address % REGISTER_ALIGNMENT != 0 {
                    return Err(Error::Configuration(format!(
                        "base_address {base_address:#x} is not {REGISTER_ALIGNMENT}-byte aligned"
                    )));
                }
                if *window_size == 0 {
                    return Err(Error::Configuration("window_size must be non-zero".to_string()));
                }
                if !matches!(register_width, 1 | 2 | 4 | 8) {
                    return Err(Error::Configuration(format!(
                        "register_width must be 1, 2, 4 or 8, got {register_width}"
                    )));
                }
                Ok(())
            }
            Self::Vendor { kernel, .. } if kernel.is_empty() => {
                Err(Error::Configuration("kernel name must not be empty".to_string()))
            }
            Self::Vendor { .. } => Ok(()),
        }
    }
}

/// Selects and configures a data-mover backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum DataMoverParameters {
    /// AXI DMA engine at a physical address
    Dma {
        base_address: u64,
        /// Status polls allowed per transfer; unbounded when absent
        #[serde(default)]
        poll_budget: Option<u64>,
    },
    /// Buffer copies through a vendor runtime
    Vendor {
        #[serde(default)]
        device: u32,
        #[serde(default)]
        memory_bank: u32,
    },
}

impl DataMoverParameters {
    pub fn dma(base_address: u64) -> Self {
        Self::Dma {
            base_address,
            poll_budget: None,
        }
    }

    pub fn vendor() -> Self {
        Self::Vendor {
            device: 0,
            memory_bank: 0,
        }
    }
}

/// Selects and configures the hardware platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum HardwareParameters {
    /// Embedded programmable logic reached through memory-mapped windows
    Mmio {
        #[serde(default)]
        bitstream: Option<String>,
        xclbin: String,
    },
    /// PCIe card behind a vendor runtime
    Vendor {
        xclbin: String,
        #[serde(default)]
        device_index: u32,
    },
}

impl HardwareParameters {
    /// Container programmed on the device
    pub fn xclbin(&self) -> &str {
        match self {
            Self::Mmio { xclbin, .. } | Self::Vendor { xclbin, .. } => xclbin,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.xclbin().is_empty() {
            return Err(Error::Configuration("cannot work with an empty xclbin path".to_string()));
        }
        Ok(())
    }
}

/// Stream construction parameters
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamParameters {
    #[serde(default)]
    pub name: String,
}

impl StreamParameters {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Everything needed to bring up a platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RynqConfig {
    pub hardware: HardwareParameters,
    #[serde(default)]
    pub accelerators: BTreeMap<String, AcceleratorParameters>,
    #[serde(default)]
    pub data_movers: BTreeMap<String, DataMoverParameters>,
    #[serde(default)]
    pub streams: Vec<StreamParameters>,
}

impl RynqConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::File(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Load the file named by `RYNQ_CONFIG`
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map_err(|_| Error::Configuration(format!("{CONFIG_ENV} is not set")))?;
        Self::from_file(path)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Configuration(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.hardware.validate()?;
        for (name, accelerator) in &self.accelerators {
            if let Err(Error::Configuration(msg)) = accelerator.validate() {
                return Err(Error::Configuration(format!("accelerator {name}: {msg}")));
            }
        }
        Ok(())
    }

    pub fn accelerator(&self, name: &str) -> Result<&AcceleratorParameters> {
        self.accelerators
            .get(name)
            .ok_or_else(|| Error::MemberAbsent(format!("accelerator {name}")))
    }

    pub fn data_mover(&self, name: &str) -> Result<&DataMoverParameters> {
        self.data_movers
            .get(name)
            .ok_or_else(|| Error::MemberAbsent(format!("data mover {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMBEDDED: &str = r#"{
        "hardware": { "backend": "mmio", "bitstream": "design.bit", "xclbin": "design.xclbin" },
        "accelerators": {
            "matmul": { "backend": "mmio", "base_address": 2684354560 }
        },
        "data_movers": {
            "dma0": { "backend": "dma", "base_address": 2684420096, "poll_budget": 100000 }
        },
        "streams": [{ "name": "main" }]
    }"#;

    #[test]
    fn test_parse_embedded_config_with_defaults() {
        let config = RynqConfig::from_json_str(EMBEDDED).unwrap();
        assert_eq!(config.accelerator("matmul").unwrap(), &AcceleratorParameters::mmio(0xA000_0000));
        assert_eq!(
            config.data_mover("dma0").unwrap(),
            &DataMoverParameters::Dma {
                base_address: 0xA001_0000,
                poll_budget: Some(100_000)
            }
        );
        assert_eq!(config.streams, vec![StreamParameters::named("main")]);
        assert_eq!(config.hardware.xclbin(), "design.xclbin");
    }

    #[test]
    fn test_parse_vendor_config() {
        let json = r#"{
            "hardware": { "backend": "vendor", "xclbin": "vadd.xclbin", "device_index": 1 },
            "accelerators": { "vadd": { "backend": "vendor", "kernel": "vadd" } },
            "data_movers": { "bo": { "backend": "vendor", "memory_bank": 2 } }
        }"#;
        let config = RynqConfig::from_json_str(json).unwrap();
        assert_eq!(
            config.hardware,
            HardwareParameters::Vendor {
                xclbin: "vadd.xclbin".to_string(),
                device_index: 1
            }
        );
        assert_eq!(config.accelerator("vadd").unwrap(), &AcceleratorParameters::vendor("vadd"));
        assert!(config.streams.is_empty());
    }

    #[test]
    fn test_unknown_backend_is_configuration_error() {
        let json = r#"{ "hardware": { "backend": "opencl", "xclbin": "x" } }"#;
        assert!(matches!(RynqConfig::from_json_str(json), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_empty_xclbin_is_rejected() {
        let json = r#"{ "hardware": { "backend": "vendor", "xclbin": "" } }"#;
        assert!(matches!(RynqConfig::from_json_str(json), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_bad_register_width_names_accelerator() {
        let json = r#"{
            "hardware": { "backend": "mmio", "xclbin": "x" },
            "accelerators": { "gpio": { "backend": "mmio", "base_address": 0, "register_width": 3 } }
        }"#;
        let err = RynqConfig::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("accelerator gpio"), "{err}");
    }

    #[test]
    fn test_misaligned_base_address_is_rejected() {
        let json = r#"{
            "hardware": { "backend": "mmio", "xclbin": "x" },
            "accelerators": { "skewed": { "backend": "mmio", "base_address": 2684354562 } }
        }"#;
        let err = RynqConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("accelerator skewed"), "{err}");
    }

    #[test]
    fn test_missing_member_lookup() {
        let config = RynqConfig::from_json_str(EMBEDDED).unwrap();
        assert!(matches!(config.accelerator("fft"), Err(Error::MemberAbsent(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let config = RynqConfig::from_json_str(EMBEDDED).unwrap();
        let json = config.to_json_string().unwrap();
        assert_eq!(RynqConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_file_error() {
        let err = RynqConfig::from_file("/nonexistent/rynq.json").unwrap_err();
        assert!(matches!(err, Error::File(_)));
    }
}
