//! Flow director register map and register access
//!
//! Offsets and bit layouts for the flow director block, the receive packet
//! buffer size registers it shares memory with, and the [`RegisterIo`]
//! abstraction the bring-up sequencer drives.

use crate::error::{FdirError, FdirResult};
use std::ptr::NonNull;
use std::time::Duration;

// =============================================================================
// Receive packet buffer
// =============================================================================

/// Number of receive packet buffer partitions
pub const PBRX_COUNT: u32 = 8;

/// Receive packet buffer `i` size register (bytes)
#[inline]
pub const fn pbrxsize(i: u32) -> u32 {
    0x01_9020 + i * 4
}

// =============================================================================
// Control register
// =============================================================================

/// Flow director control
pub const FDIRCTL: u32 = 0x01_9500;

/// Buffer allocation class, bits 1:0
pub const FDIRCTL_BUF_MASK: u32 = 0x3;
pub const FDIRCTL_BUF_64K: u32 = 1;
pub const FDIRCTL_BUF_128K: u32 = 2;
pub const FDIRCTL_BUF_256K: u32 = 3;
/// Set by hardware once a control write has been applied
pub const FDIRCTL_INITDONE: u32 = 1 << 3;
/// Perfect-match filtering
pub const FDIRCTL_PERFECT: u32 = 1 << 4;
/// Match status reporting, bits 7:5
pub const FDIRCTL_REPORT_MASK: u32 = 0x7 << 5;
pub const FDIRCTL_REPORT_MATCH: u32 = 1 << 5;
pub const FDIRCTL_REPORT_ALWAYS: u32 = 5 << 5;
/// Drop queue, bits 14:8
pub const FDIRCTL_DROPQP_SHIFT: u32 = 8;
pub const FDIRCTL_DROPQP_MAX: u32 = 0x7F;
/// Max filters per hash bucket, bits 27:24
pub const FDIRCTL_MAXLEN_SHIFT: u32 = 24;
/// Free-filter interrupt threshold, bits 31:28
pub const FDIRCTL_FULLTHR_SHIFT: u32 = 28;

/// Drop queue field value
#[inline]
pub const fn fdirctl_dropqp(queue: u32) -> u32 {
    (queue & FDIRCTL_DROPQP_MAX) << FDIRCTL_DROPQP_SHIFT
}

/// Hash bucket depth field value
#[inline]
pub const fn fdirctl_maxlen(len: u32) -> u32 {
    (len & 0xF) << FDIRCTL_MAXLEN_SHIFT
}

/// Interrupt threshold field value
#[inline]
pub const fn fdirctl_fullthr(thr: u32) -> u32 {
    (thr & 0xF) << FDIRCTL_FULLTHR_SHIFT
}

/// Bytes of receive buffer taken by the buffer class encoded in `fdirctl`
#[inline]
pub const fn fdirctl_buf_bytes(fdirctl: u32) -> u32 {
    1 << (15 + (fdirctl & FDIRCTL_BUF_MASK))
}

// =============================================================================
// Hash keys
// =============================================================================

/// Bucket hash key
pub const FDIRBKTHKEY: u32 = 0x01_9568;
/// Signature hash key
pub const FDIRSIGHKEY: u32 = 0x01_956C;

// =============================================================================
// Mask registers
// =============================================================================

/// Field mask selection
pub const FDIRMSK: u32 = 0x01_9570;
pub const FDIRMSK_VLANID: u32 = 1 << 0;
pub const FDIRMSK_VLANP: u32 = 1 << 1;
pub const FDIRMSK_POOL: u32 = 1 << 2;
/// Use the L4 protocol instead of ports
pub const FDIRMSK_L4P: u32 = 1 << 3;

/// Combined IPv6 source/destination mask (signature mode only)
pub const FDIRIP6MSK: u32 = 0x01_9574;

/// IPv6 source mask sub-field
#[inline]
pub const fn fdirip6msk_src(mask: u32) -> u32 {
    mask & 0xFF
}

/// IPv6 destination mask sub-field
#[inline]
pub const fn fdirip6msk_dst(mask: u32) -> u32 {
    (mask & 0xFF) << 8
}

pub const FDIRSIP4MSK: u32 = 0x01_9520;
pub const FDIRDIP4MSK: u32 = 0x01_9524;
pub const FDIRTCPMSK: u32 = 0x01_9528;
pub const FDIRUDPMSK: u32 = 0x01_952C;
pub const FDIRSCTPMSK: u32 = 0x01_9560;

// =============================================================================
// Flexible-byte configuration
// =============================================================================

/// Number of flex configuration registers
pub const FDIRFLEXCFG_COUNT: u32 = 16;
/// Profile slots packed into each flex configuration register
pub const FDIRFLEXCFG_SLOTS_PER_REG: u32 = 4;
/// Total classification profile slots
pub const FDIRFLEXCFG_SLOTS: u32 = FDIRFLEXCFG_COUNT * FDIRFLEXCFG_SLOTS_PER_REG;

/// Flex configuration register `i`
#[inline]
pub const fn fdirflexcfg(i: u32) -> u32 {
    0x01_9580 + i * 4
}

/// Sub-field base, bits 1:0
pub const FLEX_BASE_MASK: u8 = 0x3;
pub const FLEX_BASE_MAC: u8 = 0;
/// Flex bytes are ignored in the match
pub const FLEX_DIA: u8 = 1 << 2;
/// Sub-field offset in 16-bit words, bits 7:3
pub const FLEX_OFST_SHIFT: u8 = 3;
pub const FLEX_OFST_MAX: u8 = 0x1F;
pub const FLEX_OFST_MASK: u8 = FLEX_OFST_MAX << FLEX_OFST_SHIFT;

/// One flex configuration register holding four 8-bit profile sub-fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct FlexCfgReg(pub u32);

impl FlexCfgReg {
    /// Sub-field of profile `slot` (0..4)
    #[inline]
    pub fn slot(self, slot: u32) -> u8 {
        debug_assert!(slot < FDIRFLEXCFG_SLOTS_PER_REG);
        (self.0 >> (slot * 8)) as u8
    }

    /// Replace sub-field `slot`, leaving the other three untouched
    #[inline]
    pub fn set_slot(&mut self, slot: u32, value: u8) {
        debug_assert!(slot < FDIRFLEXCFG_SLOTS_PER_REG);
        let shift = slot * 8;
        self.0 = (self.0 & !(0xFF << shift)) | ((value as u32) << shift);
    }
}

// =============================================================================
// Register access
// =============================================================================

/// 32-bit register access to one device
///
/// The sequencer is the only caller and holds `&mut` for the whole pass,
/// so implementations need no locking.
pub trait RegisterIo {
    /// Read register at byte offset `reg`
    fn read32(&self, reg: u32) -> u32;

    /// Write register at byte offset `reg`
    fn write32(&mut self, reg: u32, value: u32);

    /// Push posted writes out to the device
    fn flush(&self) {}

    /// Block for `ms` milliseconds between polls
    fn delay_ms(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for &mut T {
    fn read32(&self, reg: u32) -> u32 {
        (**self).read32(reg)
    }

    fn write32(&mut self, reg: u32, value: u32) {
        (**self).write32(reg, value)
    }

    fn flush(&self) {
        (**self).flush()
    }

    fn delay_ms(&mut self, ms: u64) {
        (**self).delay_ms(ms)
    }
}

/// Bytes of BAR space the flow director registers span
pub const REGISTER_WINDOW: usize = fdirflexcfg(FDIRFLEXCFG_COUNT) as usize;

/// Memory-mapped register window (BAR0)
pub struct MmioRegisters {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is owned exclusively by this handle.
unsafe impl Send for MmioRegisters {}

impl MmioRegisters {
    /// Wrap a mapped register window
    ///
    /// # Safety
    ///
    /// `base` must point to a live device mapping of at least `len` bytes
    /// that stays mapped for the lifetime of the returned value and is not
    /// accessed through any other handle.
    ///
    /// Fails if the window does not cover every flow director register.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> FdirResult<Self> {
        if len < REGISTER_WINDOW {
            return Err(FdirError::RegisterWindow {
                len,
                required: REGISTER_WINDOW,
            });
        }
        Ok(Self { base, len })
    }

    #[inline]
    fn reg_ptr(&self, reg: u32) -> *mut u32 {
        let off = reg as usize;
        debug_assert!(off % 4 == 0 && off + 4 <= self.len, "register {reg:#x} outside BAR");
        // SAFETY: every register offset in this module lies below
        // REGISTER_WINDOW, which `new` checked against the mapped length.
        unsafe { self.base.as_ptr().add(off) as *mut u32 }
    }
}

impl RegisterIo for MmioRegisters {
    #[inline]
    fn read32(&self, reg: u32) -> u32 {
        // SAFETY: `reg_ptr` yields an aligned in-bounds device address.
        unsafe { std::ptr::read_volatile(self.reg_ptr(reg)) }
    }

    #[inline]
    fn write32(&mut self, reg: u32, value: u32) {
        // SAFETY: `reg_ptr` yields an aligned in-bounds device address.
        unsafe { std::ptr::write_volatile(self.reg_ptr(reg), value) }
    }

    fn flush(&self) {
        let _ = self.read32(FDIRCTL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flexcfg_set_slot_preserves_neighbours() {
        let mut reg = FlexCfgReg(0xAABB_CCDD);
        reg.set_slot(1, 0x11);
        assert_eq!(reg.0, 0xAABB_11DD);
        assert_eq!(reg.slot(0), 0xDD);
        assert_eq!(reg.slot(1), 0x11);
        assert_eq!(reg.slot(3), 0xAA);
    }

    #[test]
    fn test_buf_bytes_per_class() {
        assert_eq!(fdirctl_buf_bytes(FDIRCTL_BUF_64K), 64 * 1024);
        assert_eq!(fdirctl_buf_bytes(FDIRCTL_BUF_128K), 128 * 1024);
        assert_eq!(fdirctl_buf_bytes(FDIRCTL_BUF_256K | FDIRCTL_PERFECT), 256 * 1024);
    }

    #[test]
    fn test_dropqp_field() {
        assert_eq!(fdirctl_dropqp(3), 0x300);
        assert_eq!(fdirctl_dropqp(127), 0x7F00);
    }

    #[test]
    fn test_mmio_round_trip() {
        let mut backing = vec![0u32; 0x2_0000 / 4];
        let base = NonNull::new(backing.as_mut_ptr() as *mut u8).unwrap();
        let mut mmio = unsafe { MmioRegisters::new(base, backing.len() * 4) }.unwrap();
        mmio.write32(FDIRMSK, 0xDEAD_BEEF);
        assert_eq!(mmio.read32(FDIRMSK), 0xDEAD_BEEF);
        drop(mmio);
        assert_eq!(backing[(FDIRMSK / 4) as usize], 0xDEAD_BEEF);
    }

    #[test]
    fn test_mmio_rejects_short_window() {
        let mut backing = vec![0u32; 0x1000 / 4];
        let base = NonNull::new(backing.as_mut_ptr() as *mut u8).unwrap();
        let err = unsafe { MmioRegisters::new(base, backing.len() * 4) }.err();
        assert_eq!(
            err,
            Some(FdirError::RegisterWindow {
                len: 0x1000,
                required: REGISTER_WINDOW,
            })
        );
    }
}
