//! Flow director bring-up sequencer
//!
//! Validates a full [`FdirConfig`] up front, then programs the device in a
//! fixed order:
//!
//! 1. shrink receive packet buffer 0 by the filter table footprint and
//!    zero buffers 1..8
//! 2. field mask registers
//! 3. flexible-byte profile registers
//! 4. hash keys and control register, then poll init-done
//!
//! The first failing step ends the pass. Nothing already written is rolled
//! back; callers reset the device on error.

use crate::error::{BringUpError, FdirError, FdirResult, Stage};
use crate::flex::{FlexConf, FlexWindow};
use crate::mask::{DeviceMaskState, FieldMaskSet, MaskRegisters};
use crate::policy::{ClassificationPolicy, ControlFlags};
use crate::regs::{self, RegisterIo};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Bucket hash key
pub const ATR_BUCKET_HASH_KEY: u32 = 0x3DAD_14E2;
/// Signature hash key
pub const ATR_SIGNATURE_HASH_KEY: u32 = 0x174D_3614;
/// Max filters per hash bucket
pub const FDIR_BUCKET_DEPTH: u32 = 0xA;
/// Interrupt when this many filters (in units of 16) are left
pub const FDIR_FULL_THRESHOLD: u32 = 4;
/// Init-done polls, 1 ms apart
pub const FDIR_INIT_DONE_POLL: u32 = 10;

/// Everything one configuration pass needs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FdirConfig {
    /// Mode, buffer class, reporting, drop queue
    pub policy: ClassificationPolicy,
    /// Field masks
    pub masks: FieldMaskSet,
    /// Flexible-byte descriptors
    pub flex: FlexConf,
}

/// Validated register payloads for one pass
struct Staged {
    flags: ControlFlags,
    masks: MaskRegisters,
    window: FlexWindow,
}

fn fail(stage: Stage, source: FdirError) -> BringUpError {
    error!(%stage, error = %source, "flow director bring-up failed");
    BringUpError::new(stage, source)
}

/// Flow director of one device
///
/// Holds the register handle and the [`DeviceMaskState`] for the lifetime
/// of the device. All configuration goes through `&mut self`.
pub struct FlowDirector<R: RegisterIo> {
    io: R,
    state: DeviceMaskState,
    configured: bool,
}

impl<R: RegisterIo> FlowDirector<R> {
    /// Wrap a device register handle
    pub fn new(io: R) -> Self {
        Self {
            io,
            state: DeviceMaskState::default(),
            configured: false,
        }
    }

    /// Masks from the last successful configuration
    pub fn mask_state(&self) -> &DeviceMaskState {
        &self.state
    }

    /// Last pass completed
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Register handle
    pub fn io(&self) -> &R {
        &self.io
    }

    /// Release the register handle
    pub fn into_inner(self) -> R {
        self.io
    }

    /// Run the full bring-up sequence
    pub fn configure(&mut self, config: &FdirConfig) -> Result<(), BringUpError> {
        self.configured = false;
        info!(
            mode = ?config.policy.mode,
            pballoc = ?config.policy.pballoc,
            status = ?config.policy.status,
            "configuring flow director"
        );

        let staged = Self::validate(config)?;

        resize_buffers(&mut self.io, &staged.flags).map_err(|e| fail(Stage::ResizeBuffers, e))?;

        staged.masks.program(&mut self.io);

        staged.window.program(&mut self.io);

        enable(&mut self.io, staged.flags.fdirctl).map_err(|e| fail(Stage::Enable, e))?;

        let mut state = DeviceMaskState::from_staged(&config.masks, staged.masks);
        state.flex_bytes_mask = staged.window.mask();
        state.flex_bytes_offset = staged.window.offset_bytes();
        state.drop_queue = staged.flags.drop_queue();
        self.state = state;
        self.configured = true;

        info!(
            drop_queue = ?self.state.drop_queue,
            flex_offset = self.state.flex_bytes_offset,
            "flow director configured"
        );
        Ok(())
    }

    /// Move the flex window of a running flow director
    ///
    /// Rewrites every profile slot and waits for the hardware to pick the
    /// change up. The current flex mask is kept. Only valid after a
    /// successful [`configure`](Self::configure).
    pub fn set_flex_offset(&mut self, offset: u16) -> Result<(), BringUpError> {
        if !self.configured {
            return Err(fail(
                Stage::Validate,
                FdirError::policy("mode", "flow director is not enabled"),
            ));
        }
        let exact = self.state.flex_bytes_mask != 0;
        let window = FlexWindow::new(offset, exact).map_err(|e| fail(Stage::Validate, e))?;

        window.program(&mut self.io);
        self.io.flush();
        wait_init_done(&mut self.io).map_err(|e| fail(Stage::ProgramFlexWindow, e))?;

        self.state.flex_bytes_offset = window.offset_bytes();
        debug!(offset, "flex window moved");
        Ok(())
    }

    fn validate(config: &FdirConfig) -> Result<Staged, BringUpError> {
        let mode = config.policy.mode;
        if !mode.is_supported() {
            return Err(fail(Stage::Validate, FdirError::UnsupportedMode(mode)));
        }
        let flags = ControlFlags::build(&config.policy).map_err(|e| fail(Stage::Validate, e))?;
        let masks = MaskRegisters::stage(mode, &config.masks)
            .map_err(|e| fail(Stage::ProgramMasks, e))?;
        let window = FlexWindow::resolve(flags.flex, &config.flex)
            .map_err(|e| fail(Stage::ProgramFlexWindow, e))?;
        Ok(Staged {
            flags,
            masks,
            window,
        })
    }
}

/// Hand the filter table footprint from receive buffer 0 to the flow director
///
/// Buffers 1..8 reset to nonzero sizes; left alone the total would overlap
/// the filter table.
fn resize_buffers<R: RegisterIo + ?Sized>(io: &mut R, flags: &ControlFlags) -> FdirResult<()> {
    let footprint = flags.buffer_bytes();
    let pb0 = io.read32(regs::pbrxsize(0));
    if pb0 < footprint {
        warn!(pb0, footprint, "receive buffer 0 smaller than filter table");
    }
    let resized = pb0.saturating_sub(footprint);
    io.write32(regs::pbrxsize(0), resized);

    for i in 1..regs::PBRX_COUNT {
        io.write32(regs::pbrxsize(i), 0);
    }

    debug!(pb0, resized, footprint, "resized receive packet buffers");
    Ok(())
}

/// Prime hash keys, write the control register and wait for init-done
fn enable<R: RegisterIo + ?Sized>(io: &mut R, fdirctl: u32) -> FdirResult<()> {
    io.write32(regs::FDIRBKTHKEY, ATR_BUCKET_HASH_KEY);
    io.write32(regs::FDIRSIGHKEY, ATR_SIGNATURE_HASH_KEY);

    let fdirctl = fdirctl
        | regs::fdirctl_maxlen(FDIR_BUCKET_DEPTH)
        | regs::fdirctl_fullthr(FDIR_FULL_THRESHOLD);

    io.write32(regs::FDIRCTL, fdirctl);
    io.flush();

    let polls = wait_init_done(io)?;
    debug!(fdirctl, polls, "flow director enabled");
    Ok(())
}

/// Poll `FDIRCTL.INITDONE` once per millisecond
///
/// Returns the number of polls it took.
fn wait_init_done<R: RegisterIo + ?Sized>(io: &mut R) -> FdirResult<u32> {
    for poll in 1..=FDIR_INIT_DONE_POLL {
        if io.read32(regs::FDIRCTL) & regs::FDIRCTL_INITDONE != 0 {
            return Ok(poll);
        }
        io.delay_ms(1);
    }
    Err(FdirError::HardwareTimeout {
        register: regs::FDIRCTL,
        polls: FDIR_INIT_DONE_POLL,
    })
}
