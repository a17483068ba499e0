//! Classification policy and control-register flag builder
//!
//! Turns a [`ClassificationPolicy`] into the `FDIRCTL` payload and the
//! default flexible-byte sub-field. Pure; nothing here touches hardware.

use crate::error::{FdirError, FdirResult};
use crate::regs;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default flex-byte window offset in bytes (start of the EtherType)
pub const DEFAULT_FLEXBYTES_OFFSET: u16 = 12;

/// Default drop queue in perfect mode
pub const DEFAULT_DROP_QUEUE: u8 = 127;

/// Flow director operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum FdirMode {
    /// Flow director disabled
    None = 0,
    /// Hashed signature filters
    Signature = 1,
    /// Exact-match filters with a drop queue
    Perfect = 2,
    /// Perfect match on MAC and VLAN
    PerfectMacVlan = 3,
    /// Perfect match on tunnel headers
    PerfectTunnel = 4,
}

impl FdirMode {
    /// Signature or perfect, the two modes this core programs
    #[inline]
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Signature | Self::Perfect)
    }
}

impl Default for FdirMode {
    fn default() -> Self {
        Self::Signature
    }
}

impl TryFrom<u32> for FdirMode {
    type Error = FdirError;

    fn try_from(value: u32) -> FdirResult<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Signature),
            2 => Ok(Self::Perfect),
            3 => Ok(Self::PerfectMacVlan),
            4 => Ok(Self::PerfectTunnel),
            other => Err(FdirError::policy("mode", format!("unknown mode {other}"))),
        }
    }
}

/// Receive buffer memory reserved for the filter table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum PballocSize {
    /// 64 KiB: 8k - 1 signature filters
    #[serde(rename = "64k")]
    Size64K = 0,
    /// 128 KiB: 16k - 1 signature filters
    #[serde(rename = "128k")]
    Size128K = 1,
    /// 256 KiB: 32k - 1 signature filters
    #[serde(rename = "256k")]
    Size256K = 2,
}

impl PballocSize {
    #[inline]
    fn ctl_bits(self) -> u32 {
        match self {
            Self::Size64K => regs::FDIRCTL_BUF_64K,
            Self::Size128K => regs::FDIRCTL_BUF_128K,
            Self::Size256K => regs::FDIRCTL_BUF_256K,
        }
    }

    /// Bytes taken from receive packet buffer 0
    #[inline]
    pub fn bytes(self) -> u32 {
        regs::fdirctl_buf_bytes(self.ctl_bits())
    }
}

impl Default for PballocSize {
    fn default() -> Self {
        Self::Size64K
    }
}

impl TryFrom<u32> for PballocSize {
    type Error = FdirError;

    fn try_from(value: u32) -> FdirResult<Self> {
        match value {
            0 => Ok(Self::Size64K),
            1 => Ok(Self::Size128K),
            2 => Ok(Self::Size256K),
            other => Err(FdirError::policy("pballoc", format!("unknown size class {other}"))),
        }
    }
}

/// Match status reporting in the receive descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum ReportStatus {
    /// Never report
    None = 0,
    /// Report hash and filter index when a rule matches
    OnMatch = 1,
    /// Always report
    Always = 2,
}

impl Default for ReportStatus {
    fn default() -> Self {
        Self::OnMatch
    }
}

impl TryFrom<u32> for ReportStatus {
    type Error = FdirError;

    fn try_from(value: u32) -> FdirResult<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::OnMatch),
            2 => Ok(Self::Always),
            other => Err(FdirError::policy("status", format!("unknown report level {other}"))),
        }
    }
}

/// Classification policy supplied by the device configuration path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationPolicy {
    /// Operating mode
    pub mode: FdirMode,
    /// Filter memory size class
    pub pballoc: PballocSize,
    /// Match status reporting
    pub status: ReportStatus,
    /// Queue for dropped packets (perfect mode only)
    pub drop_queue: u8,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self {
            mode: FdirMode::default(),
            pballoc: PballocSize::default(),
            status: ReportStatus::default(),
            drop_queue: DEFAULT_DROP_QUEUE,
        }
    }
}

/// Control register payload plus default flex sub-field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlags {
    /// `FDIRCTL` value before bucket depth and threshold are merged in
    pub fdirctl: u32,
    /// Flex profile sub-field
    pub flex: u8,
}

impl ControlFlags {
    /// Validate `policy` and derive the control bits
    pub fn build(policy: &ClassificationPolicy) -> FdirResult<Self> {
        let mut fdirctl = policy.pballoc.ctl_bits();

        fdirctl |= match policy.status {
            ReportStatus::None => 0,
            ReportStatus::OnMatch => regs::FDIRCTL_REPORT_MATCH,
            ReportStatus::Always => regs::FDIRCTL_REPORT_ALWAYS,
        };

        let flex = regs::FLEX_BASE_MAC
            | (((DEFAULT_FLEXBYTES_OFFSET / 2) as u8) << regs::FLEX_OFST_SHIFT);

        match policy.mode {
            FdirMode::Signature => {}
            FdirMode::Perfect => {
                if u32::from(policy.drop_queue) > regs::FDIRCTL_DROPQP_MAX {
                    return Err(FdirError::policy(
                        "drop_queue",
                        format!(
                            "queue {} exceeds {}",
                            policy.drop_queue,
                            regs::FDIRCTL_DROPQP_MAX
                        ),
                    ));
                }
                fdirctl |= regs::FDIRCTL_PERFECT;
                fdirctl |= regs::fdirctl_dropqp(policy.drop_queue.into());
            }
            other => {
                return Err(FdirError::policy("mode", format!("{other:?} cannot be programmed")));
            }
        }

        debug!(fdirctl, flex, "built flow director flags");
        Ok(Self { fdirctl, flex })
    }

    /// Bytes of receive buffer 0 handed to the filter table
    #[inline]
    pub fn buffer_bytes(&self) -> u32 {
        regs::fdirctl_buf_bytes(self.fdirctl)
    }

    /// Drop queue encoded in perfect mode
    pub fn drop_queue(&self) -> Option<u8> {
        (self.fdirctl & regs::FDIRCTL_PERFECT != 0)
            .then(|| ((self.fdirctl >> regs::FDIRCTL_DROPQP_SHIFT) & regs::FDIRCTL_DROPQP_MAX) as u8)
    }
}
