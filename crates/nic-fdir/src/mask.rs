//! Field mask codec
//!
//! Converts user field masks into the hardware encoding:
//!
//! - IPv6 byte masks collapse to a 16-bit compact form, one bit per byte
//! - TCP/UDP/SCTP port masks are packed into one word and bit-mirrored per port
//! - VLAN TCI masks select the `FDIRMSK` VLAN id / priority bits
//!
//! Mask registers have the opposite polarity to policy masks, so every
//! value leaving this module for a mask register is complemented here and
//! nowhere else.

use crate::error::{FdirError, FdirResult};
use crate::policy::FdirMode;
use crate::regs::{self, RegisterIo};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const VLAN_PRIO: u16 = 0xE000;
const VLAN_ID: u16 = 0x0FFF;

/// User supplied field masks (1 bits take part in the match)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMaskSet {
    /// VLAN TCI mask
    pub vlan_tci_mask: u16,
    /// L4 source port mask
    pub src_port_mask: u16,
    /// L4 destination port mask
    pub dst_port_mask: u16,
    /// IPv4 source address mask
    pub src_ipv4_mask: u32,
    /// IPv4 destination address mask
    pub dst_ipv4_mask: u32,
    /// IPv6 source address mask, byte granularity
    pub src_ipv6_mask: [u8; 16],
    /// IPv6 destination address mask, byte granularity
    pub dst_ipv6_mask: [u8; 16],
}

impl FieldMaskSet {
    /// Every field must match exactly
    pub fn full() -> Self {
        Self {
            vlan_tci_mask: 0xEFFF,
            src_port_mask: 0xFFFF,
            dst_port_mask: 0xFFFF,
            src_ipv4_mask: 0xFFFF_FFFF,
            dst_ipv4_mask: 0xFFFF_FFFF,
            src_ipv6_mask: [0xFF; 16],
            dst_ipv6_mask: [0xFF; 16],
        }
    }
}

/// Collapse a 16-byte address mask to one bit per byte
///
/// Bit `i` is set iff byte `i` is `0xFF`. Bytes other than `0x00`/`0xFF`
/// cannot be expressed by the hardware.
pub fn encode_address_mask(raw: &[u8; 16]) -> FdirResult<u16> {
    let mut mask = 0u16;
    for (i, &byte) in raw.iter().enumerate() {
        match byte {
            0xFF => mask |= 1 << i,
            0x00 => {}
            other => {
                return Err(FdirError::mask(
                    "ipv6_mask",
                    format!("byte {i} is {other:#04x}, expected 0x00 or 0xff"),
                ));
            }
        }
    }
    Ok(mask)
}

/// Expand a compact address mask back to bytes
pub fn decode_address_mask(mask: u16) -> [u8; 16] {
    let mut raw = [0u8; 16];
    for (i, byte) in raw.iter_mut().enumerate() {
        if mask & (1 << i) != 0 {
            *byte = 0xFF;
        }
    }
    raw
}

/// Parallel-swap bit reversal of a 32-bit word
///
/// Swaps adjacent 1-, 2- and 4-bit groups, then the bytes of each 16-bit
/// half. The halves themselves stay in place, so each port keeps its
/// position with its bits mirrored.
#[inline]
pub const fn reverse_port_bits(mut v: u32) -> u32 {
    v = ((v & 0x5555_5555) << 1) | ((v & 0xAAAA_AAAA) >> 1);
    v = ((v & 0x3333_3333) << 2) | ((v & 0xCCCC_CCCC) >> 2);
    v = ((v & 0x0F0F_0F0F) << 4) | ((v & 0xF0F0_F0F0) >> 4);
    ((v & 0x00FF_00FF) << 8) | ((v & 0xFF00_FF00) >> 8)
}

/// Combined port mask in hardware bit order
///
/// `dst` fills the high half and `src` the low half of the word passed to
/// [`reverse_port_bits`].
#[inline]
pub const fn reverse_port_mask(dst: u16, src: u16) -> u32 {
    reverse_port_bits(((dst as u32) << 16) | src as u32)
}

/// `FDIRMSK` VLAN bits for a TCI mask
///
/// The DEI bit is ignored. Any id bit in the mask keeps the VLAN id in the
/// match, any priority bit keeps the priority.
pub fn encode_vlan_mask(tci_mask: u16) -> u32 {
    let mut fdirm = 0;
    if tci_mask & VLAN_ID == 0 {
        fdirm |= regs::FDIRMSK_VLANID;
    }
    if tci_mask & VLAN_PRIO == 0 {
        fdirm |= regs::FDIRMSK_VLANP;
    }
    fdirm
}

fn compact_prefix(raw: &[u8; 16], field: &'static str) -> FdirResult<u16> {
    let mask = encode_address_mask(raw).map_err(|e| match e {
        FdirError::InvalidMask { reason, .. } => FdirError::InvalidMask { field, reason },
        other => other,
    })?;
    // Ones from byte 0 with no gap: mask + 1 is a power of two.
    let wide = u32::from(mask);
    if wide & (wide + 1) != 0 {
        return Err(FdirError::mask(
            field,
            format!("compact mask {mask:#06x} is not a byte prefix"),
        ));
    }
    Ok(mask)
}

/// Register image for one mask programming pass
///
/// Built and validated in full by [`MaskRegisters::stage`] before
/// [`MaskRegisters::program`] writes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaskRegisters {
    /// `FDIRMSK`
    pub fdirm: u32,
    /// `FDIRTCPMSK`, `FDIRUDPMSK` and `FDIRSCTPMSK`
    pub l4_ports: u32,
    /// `FDIRSIP4MSK`
    pub src_ipv4: u32,
    /// `FDIRDIP4MSK`
    pub dst_ipv4: u32,
    /// `FDIRIP6MSK`, signature mode only
    pub ipv6: Option<u32>,
    /// Compact source IPv6 mask
    pub src_ipv6_compact: u16,
    /// Compact destination IPv6 mask
    pub dst_ipv6_compact: u16,
}

impl MaskRegisters {
    /// Validate every field of `masks` and compute the register values
    pub fn stage(mode: FdirMode, masks: &FieldMaskSet) -> FdirResult<Self> {
        if !mode.is_supported() {
            return Err(FdirError::UnsupportedMode(mode));
        }

        let src_ipv6_compact = compact_prefix(&masks.src_ipv6_mask, "src_ipv6_mask")?;
        let dst_ipv6_compact = compact_prefix(&masks.dst_ipv6_mask, "dst_ipv6_mask")?;

        // Pool is not supported; mask it out.
        let mut fdirm = regs::FDIRMSK_POOL | encode_vlan_mask(masks.vlan_tci_mask);
        if masks.dst_port_mask == 0 && masks.src_port_mask == 0 {
            fdirm |= regs::FDIRMSK_L4P;
        }

        let l4_ports = !reverse_port_mask(masks.dst_port_mask, masks.src_port_mask);

        let ipv6 = (mode == FdirMode::Signature).then(|| {
            let wide_bits = (src_ipv6_compact | dst_ipv6_compact) & 0xFF00;
            if wide_bits != 0 {
                warn!(
                    src = src_ipv6_compact,
                    dst = dst_ipv6_compact,
                    "IPv6 mask bytes 8..16 not representable, register keeps bytes 0..8"
                );
            }
            !(regs::fdirip6msk_dst(dst_ipv6_compact.into())
                | regs::fdirip6msk_src(src_ipv6_compact.into()))
        });

        Ok(Self {
            fdirm,
            l4_ports,
            src_ipv4: !masks.src_ipv4_mask,
            dst_ipv4: !masks.dst_ipv4_mask,
            ipv6,
            src_ipv6_compact,
            dst_ipv6_compact,
        })
    }

    /// L4 protocol substitutes for ports in the classification key
    #[inline]
    pub fn uses_l4_protocol(&self) -> bool {
        self.fdirm & regs::FDIRMSK_L4P != 0
    }

    /// Write the staged image
    pub fn program<R: RegisterIo + ?Sized>(&self, io: &mut R) {
        io.write32(regs::FDIRMSK, self.fdirm);

        // TCP, UDP and SCTP share one mask.
        io.write32(regs::FDIRTCPMSK, self.l4_ports);
        io.write32(regs::FDIRUDPMSK, self.l4_ports);
        io.write32(regs::FDIRSCTPMSK, self.l4_ports);

        io.write32(regs::FDIRSIP4MSK, self.src_ipv4);
        io.write32(regs::FDIRDIP4MSK, self.dst_ipv4);

        if let Some(ipv6) = self.ipv6 {
            io.write32(regs::FDIRIP6MSK, ipv6);
        }

        debug!(
            fdirm = self.fdirm,
            l4_ports = self.l4_ports,
            ipv6 = self.ipv6.is_some(),
            "programmed flow director masks"
        );
    }
}

/// Masks currently programmed into the device
///
/// Read by the match-reporting path. Replaced in full after every
/// successful configuration; after a failed one it still describes the
/// previous configuration, not the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceMaskState {
    /// VLAN TCI mask
    pub vlan_tci_mask: u16,
    /// L4 source port mask
    pub src_port_mask: u16,
    /// L4 destination port mask
    pub dst_port_mask: u16,
    /// IPv4 source mask
    pub src_ipv4_mask: u32,
    /// IPv4 destination mask
    pub dst_ipv4_mask: u32,
    /// Compact IPv6 source mask
    pub src_ipv6_mask: u16,
    /// Compact IPv6 destination mask
    pub dst_ipv6_mask: u16,
    /// `0xFFFF` when the flex bytes must match exactly, else 0
    pub flex_bytes_mask: u16,
    /// Flex window offset in bytes
    pub flex_bytes_offset: u8,
    /// Drop queue, perfect mode only
    pub drop_queue: Option<u8>,
    /// Register image written for the masks
    pub registers: MaskRegisters,
}

impl DeviceMaskState {
    pub(crate) fn from_staged(masks: &FieldMaskSet, registers: MaskRegisters) -> Self {
        Self {
            vlan_tci_mask: masks.vlan_tci_mask,
            src_port_mask: masks.src_port_mask,
            dst_port_mask: masks.dst_port_mask,
            src_ipv4_mask: masks.src_ipv4_mask,
            dst_ipv4_mask: masks.dst_ipv4_mask,
            src_ipv6_mask: registers.src_ipv6_compact,
            dst_ipv6_mask: registers.dst_ipv6_compact,
            registers,
            ..Default::default()
        }
    }

    /// Source IPv6 mask as bytes
    pub fn src_ipv6_mask(&self) -> [u8; 16] {
        decode_address_mask(self.src_ipv6_mask)
    }

    /// Destination IPv6 mask as bytes
    pub fn dst_ipv6_mask(&self) -> [u8; 16] {
        decode_address_mask(self.dst_ipv6_mask)
    }
}
