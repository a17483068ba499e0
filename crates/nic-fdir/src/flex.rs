//! Flexible-byte window
//!
//! A 2-byte window at an even offset from the start of the MAC header that
//! can be added to the match key. Only one window and one global mask are
//! supported; the resolved sub-field is copied into every profile slot.

use crate::error::{FdirError, FdirResult};
use crate::regs::{self, FlexCfgReg, RegisterIo};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Furthest supported window offset in bytes
pub const MAX_FLEX_SOURCE_OFFSET: u16 = 62;

/// Flex mask value meaning "match both bytes exactly"
pub const FLEX_MASK_EXACT: u16 = 0xFFFF;

/// Where the window offset is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    /// Raw packet, from the start of the MAC header
    Raw,
    /// After the L2 header
    L2,
    /// After the L3 header
    L3,
    /// After the L4 header
    L4,
}

/// Flow type a mask descriptor applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    /// All flow types
    #[default]
    Unknown,
    /// IPv4, any other L4 protocol
    Ipv4Other,
    /// IPv4 TCP
    Ipv4Tcp,
    /// IPv4 UDP
    Ipv4Udp,
    /// IPv4 SCTP
    Ipv4Sctp,
    /// IPv6, any other L4 protocol
    Ipv6Other,
    /// IPv6 TCP
    Ipv6Tcp,
    /// IPv6 UDP
    Ipv6Udp,
    /// IPv6 SCTP
    Ipv6Sctp,
    /// Non-IP, L2 payload
    L2Payload,
}

/// Window placement descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexPayloadCfg {
    /// Offset base
    #[serde(rename = "type")]
    pub kind: PayloadType,
    /// Source offsets of the two window bytes
    pub src_offset: [u16; 2],
}

impl FlexPayloadCfg {
    /// Raw window starting at `offset`
    pub fn raw(offset: u16) -> Self {
        Self {
            kind: PayloadType::Raw,
            src_offset: [offset, offset.wrapping_add(1)],
        }
    }

    fn offset(&self) -> FdirResult<u16> {
        if self.kind != PayloadType::Raw {
            return Err(FdirError::UnsupportedFlexConfig(format!(
                "payload type {:?}, only raw is supported",
                self.kind
            )));
        }
        let [first, second] = self.src_offset;
        validate_offset(first)?;
        if second != first + 1 {
            return Err(FdirError::UnsupportedFlexConfig(format!(
                "window bytes {first} and {second} are not adjacent"
            )));
        }
        Ok(first)
    }
}

/// Window mask descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexMaskCfg {
    /// Must be [`FlowType::Unknown`]
    #[serde(default)]
    pub flow_type: FlowType,
    /// Mask for the two window bytes
    pub mask: [u8; 2],
}

impl FlexMaskCfg {
    /// Global mask
    pub fn global(mask: [u8; 2]) -> Self {
        Self {
            flow_type: FlowType::Unknown,
            mask,
        }
    }

    #[inline]
    fn value(&self) -> u16 {
        u16::from_le_bytes(self.mask)
    }
}

/// Flexible-byte descriptors of one configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlexConf {
    /// Window placement
    pub payloads: Vec<FlexPayloadCfg>,
    /// Window masks
    pub masks: Vec<FlexMaskCfg>,
}

/// Check a window offset against the hardware limits
pub fn validate_offset(offset: u16) -> FdirResult<()> {
    if offset & 1 != 0 {
        return Err(FdirError::UnsupportedFlexConfig(format!(
            "offset {offset} is odd"
        )));
    }
    if offset > MAX_FLEX_SOURCE_OFFSET {
        return Err(FdirError::UnsupportedFlexConfig(format!(
            "offset {offset} exceeds {MAX_FLEX_SOURCE_OFFSET}"
        )));
    }
    Ok(())
}

/// Resolved flex profile sub-field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexWindow {
    sub_field: u8,
}

impl FlexWindow {
    /// Window at `offset` bytes, optionally requiring an exact match
    pub fn new(offset: u16, exact_match: bool) -> FdirResult<Self> {
        validate_offset(offset)?;
        let mut sub_field = regs::FLEX_BASE_MAC | ((offset / 2) as u8) << regs::FLEX_OFST_SHIFT;
        if !exact_match {
            sub_field |= regs::FLEX_DIA;
        }
        Ok(Self { sub_field })
    }

    /// Apply `conf` on top of the default sub-field from the flag builder
    ///
    /// The bytes are ignored unless a global `0xFFFF` mask is supplied.
    pub fn resolve(default: u8, conf: &FlexConf) -> FdirResult<Self> {
        let mut sub_field = default | regs::FLEX_DIA;

        let mut offset: Option<u16> = None;
        for payload in &conf.payloads {
            let requested = payload.offset()?;
            match offset {
                Some(current) if current != requested => {
                    return Err(FdirError::UnsupportedFlexConfig(format!(
                        "conflicting window offsets {current} and {requested}"
                    )));
                }
                _ => offset = Some(requested),
            }
        }
        if let Some(offset) = offset {
            sub_field &= !regs::FLEX_OFST_MASK;
            sub_field |= ((offset / 2) as u8) << regs::FLEX_OFST_SHIFT;
        }

        let mut mask: Option<u16> = None;
        for desc in &conf.masks {
            if desc.flow_type != FlowType::Unknown {
                return Err(FdirError::UnsupportedFlexConfig(format!(
                    "mask for {:?}, only a global mask is supported",
                    desc.flow_type
                )));
            }
            let value = desc.value();
            if value != 0 && value != FLEX_MASK_EXACT {
                return Err(FdirError::mask(
                    "flex_mask",
                    format!("{value:#06x}, expected 0x0000 or 0xffff"),
                ));
            }
            match mask {
                Some(current) if current != value => {
                    return Err(FdirError::UnsupportedFlexConfig(format!(
                        "conflicting global masks {current:#06x} and {value:#06x}"
                    )));
                }
                _ => mask = Some(value),
            }
        }
        if mask == Some(FLEX_MASK_EXACT) {
            sub_field &= !regs::FLEX_DIA;
        }

        Ok(Self { sub_field })
    }

    /// Raw sub-field value
    #[inline]
    pub fn sub_field(&self) -> u8 {
        self.sub_field
    }

    /// Window offset in bytes
    #[inline]
    pub fn offset_bytes(&self) -> u8 {
        ((self.sub_field & regs::FLEX_OFST_MASK) >> regs::FLEX_OFST_SHIFT) * 2
    }

    /// Flex bytes take part in the match
    #[inline]
    pub fn exact_match(&self) -> bool {
        self.sub_field & regs::FLEX_DIA == 0
    }

    /// Mask value recorded in the device state
    #[inline]
    pub fn mask(&self) -> u16 {
        if self.exact_match() {
            FLEX_MASK_EXACT
        } else {
            0
        }
    }

    /// Copy the sub-field into every profile slot
    ///
    /// Each register packs four slots, so every slot update is a
    /// read-modify-write of its register.
    pub fn program<R: RegisterIo + ?Sized>(&self, io: &mut R) {
        for slot in 0..regs::FDIRFLEXCFG_SLOTS {
            let reg = regs::fdirflexcfg(slot / regs::FDIRFLEXCFG_SLOTS_PER_REG);
            let mut value = FlexCfgReg(io.read32(reg));
            value.set_slot(slot % regs::FDIRFLEXCFG_SLOTS_PER_REG, self.sub_field);
            io.write32(reg, value.0);
        }

        debug!(
            offset = self.offset_bytes(),
            exact = self.exact_match(),
            slots = regs::FDIRFLEXCFG_SLOTS,
            "programmed flex window"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ClassificationPolicy, ControlFlags};
    use crate::sim::SimulatedDevice;

    fn default_sub_field() -> u8 {
        ControlFlags::build(&ClassificationPolicy::default()).unwrap().flex
    }

    fn resolve(conf: FlexConf) -> FdirResult<FlexWindow> {
        FlexWindow::resolve(default_sub_field(), &conf)
    }

    #[test]
    fn test_no_descriptors_keeps_default() {
        let window = resolve(FlexConf::default()).unwrap();
        assert_eq!(window.offset_bytes(), 12);
        assert!(!window.exact_match());
        assert_eq!(window.mask(), 0);
    }

    #[test]
    fn test_offset_and_exact_mask() {
        let window = resolve(FlexConf {
            payloads: vec![FlexPayloadCfg::raw(20)],
            masks: vec![FlexMaskCfg::global([0xFF, 0xFF])],
        })
        .unwrap();
        assert_eq!(window.offset_bytes(), 20);
        assert!(window.exact_match());
        assert_eq!(window.mask(), FLEX_MASK_EXACT);
        assert_eq!(window.sub_field(), 10 << 3);
    }

    #[test]
    fn test_same_offset_twice_accepted() {
        let window = resolve(FlexConf {
            payloads: vec![FlexPayloadCfg::raw(16), FlexPayloadCfg::raw(16)],
            masks: vec![],
        })
        .unwrap();
        assert_eq!(window.offset_bytes(), 16);
    }

    #[test]
    fn test_conflicting_offsets_rejected() {
        let err = resolve(FlexConf {
            payloads: vec![FlexPayloadCfg::raw(16), FlexPayloadCfg::raw(18)],
            masks: vec![],
        })
        .unwrap_err();
        assert!(matches!(err, FdirError::UnsupportedFlexConfig(_)));
    }

    #[test]
    fn test_offset_limits() {
        assert!(resolve(FlexConf {
            payloads: vec![FlexPayloadCfg::raw(62)],
            masks: vec![],
        })
        .is_ok());

        for offset in [13, 64] {
            let err = resolve(FlexConf {
                payloads: vec![FlexPayloadCfg::raw(offset)],
                masks: vec![],
            })
            .unwrap_err();
            assert!(matches!(err, FdirError::UnsupportedFlexConfig(_)), "offset {offset}");
        }
    }

    #[test]
    fn test_non_adjacent_or_non_raw_rejected() {
        let gap = FlexPayloadCfg {
            kind: PayloadType::Raw,
            src_offset: [12, 14],
        };
        let l3 = FlexPayloadCfg {
            kind: PayloadType::L3,
            src_offset: [12, 13],
        };
        for payload in [gap, l3] {
            let err = resolve(FlexConf {
                payloads: vec![payload],
                masks: vec![],
            })
            .unwrap_err();
            assert!(matches!(err, FdirError::UnsupportedFlexConfig(_)));
        }
    }

    #[test]
    fn test_partial_mask_rejected() {
        for mask in [[0xFF, 0x00], [0x00, 0xFF], [0x0F, 0xFF]] {
            let err = resolve(FlexConf {
                payloads: vec![],
                masks: vec![FlexMaskCfg::global(mask)],
            })
            .unwrap_err();
            assert!(matches!(err, FdirError::InvalidMask { field: "flex_mask", .. }));
        }
    }

    #[test]
    fn test_flow_scoped_mask_rejected() {
        let err = resolve(FlexConf {
            payloads: vec![],
            masks: vec![FlexMaskCfg {
                flow_type: FlowType::Ipv4Udp,
                mask: [0xFF, 0xFF],
            }],
        })
        .unwrap_err();
        assert!(matches!(err, FdirError::UnsupportedFlexConfig(_)));
    }

    #[test]
    fn test_conflicting_global_masks_rejected() {
        let err = resolve(FlexConf {
            payloads: vec![],
            masks: vec![FlexMaskCfg::global([0xFF, 0xFF]), FlexMaskCfg::global([0, 0])],
        })
        .unwrap_err();
        assert!(matches!(err, FdirError::UnsupportedFlexConfig(_)));
    }

    #[test]
    fn test_program_fills_every_slot_once() {
        let window = FlexWindow::new(24, true).unwrap();
        let mut dev = SimulatedDevice::new();
        window.program(&mut dev);

        let expected = u32::from_ne_bytes([window.sub_field(); 4]);
        for i in 0..regs::FDIRFLEXCFG_COUNT {
            assert_eq!(dev.peek(regs::fdirflexcfg(i)), expected);
            assert_eq!(dev.write_count(regs::fdirflexcfg(i)), 4);
        }
    }

    #[test]
    fn test_program_read_modify_write() {
        let mut dev = SimulatedDevice::new();
        dev.poke(regs::fdirflexcfg(0), 0xFFFF_FFFF);
        let window = FlexWindow::new(0, true).unwrap();
        window.program(&mut dev);
        assert_eq!(dev.peek(regs::fdirflexcfg(0)), 0);
    }

    #[test]
    fn test_conf_from_json() {
        let conf: FlexConf = serde_json::from_str(
            r#"{"payloads":[{"type":"raw","src_offset":[6,7]}],"masks":[{"mask":[255,255]}]}"#,
        )
        .unwrap();
        let window = resolve(conf).unwrap();
        assert_eq!(window.offset_bytes(), 6);
        assert!(window.exact_match());
    }
}
