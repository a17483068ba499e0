//! Flow Director bring-up
//!
//! Programs the packet-classification offload ("flow director") of a
//! txgbe-class 10G NIC: incoming packets are steered to receive queues by
//! matching header fields, using filter memory carved out of the receive
//! packet buffer.
//!
//! # Pipeline
//!
//! ```text
//!  FdirConfig ──┬─► policy::ControlFlags ────────────┐
//!               ├─► mask::MaskRegisters  ────────────┤
//!               └─► flex::FlexWindow     ────────────┤
//!                                                    ▼
//!                                  bringup::FlowDirector::configure
//!                                  ├ resize RX packet buffers
//!                                  ├ program masks
//!                                  ├ program flex profiles
//!                                  └ enable + poll init-done (10 x 1 ms)
//! ```
//!
//! Everything is validated before the first register write. After that the
//! sequence stops on the first failure without rollback, so a failed
//! [`FlowDirector::configure`] leaves the flow director in an unspecified
//! state and the device must be reset.
//!
//! # Example
//!
//! ```
//! use nic_fdir::{FdirConfig, FdirMode, FlowDirector, sim::SimulatedDevice};
//!
//! let mut cfg = FdirConfig::default();
//! cfg.policy.mode = FdirMode::Perfect;
//! cfg.policy.drop_queue = 3;
//!
//! let mut fdir = FlowDirector::new(SimulatedDevice::new());
//! fdir.configure(&cfg).unwrap();
//! assert_eq!(fdir.mask_state().drop_queue, Some(3));
//! ```

#![warn(clippy::all)]

pub mod bringup;
pub mod error;
pub mod flex;
pub mod mask;
pub mod policy;
pub mod regs;
pub mod sim;

pub use bringup::{FdirConfig, FlowDirector};
pub use error::{BringUpError, FdirError, FdirResult, Stage};
pub use flex::{FlexConf, FlexMaskCfg, FlexPayloadCfg, FlexWindow, FlowType, PayloadType};
pub use mask::{
    decode_address_mask, encode_address_mask, reverse_port_mask, DeviceMaskState, FieldMaskSet,
    MaskRegisters,
};
pub use policy::{ClassificationPolicy, ControlFlags, FdirMode, PballocSize, ReportStatus};
pub use regs::{MmioRegisters, RegisterIo};
