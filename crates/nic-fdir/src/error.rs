//! Error types for flow director configuration

use std::fmt;
use thiserror::Error;

/// Flow director configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FdirError {
    /// Policy value the hardware cannot express
    #[error("invalid policy: {field}: {reason}")]
    InvalidPolicy {
        /// Offending policy field
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Malformed address, port or flex mask
    #[error("invalid mask: {field}: {reason}")]
    InvalidMask {
        /// Offending mask field
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Conflicting or non-global flexible-byte descriptors
    #[error("unsupported flex configuration: {0}")]
    UnsupportedFlexConfig(String),

    /// Flow director mode other than signature or perfect
    #[error("unsupported flow director mode: {0:?}")]
    UnsupportedMode(crate::FdirMode),

    /// Mapped register window too small for the flow director registers
    #[error("register window of {len:#x} bytes, need at least {required:#x}")]
    RegisterWindow {
        /// Mapped length
        len: usize,
        /// Bytes the register map spans
        required: usize,
    },

    /// Init-done bit never observed within the poll budget
    #[error("hardware timeout: init-done not set after {polls} polls of register {register:#08x}")]
    HardwareTimeout {
        /// Polled register
        register: u32,
        /// Number of polls performed
        polls: u32,
    },
}

impl FdirError {
    pub(crate) fn policy(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn mask(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidMask {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for flow director operations
pub type FdirResult<T> = Result<T, FdirError>;

/// Bring-up stage in which a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Pre-flight validation; no register touched yet
    Validate,
    /// Receive packet buffer resize
    ResizeBuffers,
    /// Field mask registers
    ProgramMasks,
    /// Flexible-byte profile registers
    ProgramFlexWindow,
    /// Hash keys, control register and init-done poll
    Enable,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::ResizeBuffers => "resize-buffers",
            Self::ProgramMasks => "program-masks",
            Self::ProgramFlexWindow => "program-flex-window",
            Self::Enable => "enable",
        };
        f.write_str(name)
    }
}

/// Failed bring-up: the stage that stopped the sequence and why
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("flow director bring-up failed at {stage}: {source}")]
pub struct BringUpError {
    /// Stage that failed
    pub stage: Stage,
    /// Underlying error
    #[source]
    pub source: FdirError,
}

impl BringUpError {
    /// Create at `stage`
    pub fn new(stage: Stage, source: FdirError) -> Self {
        Self { stage, source }
    }

    /// Underlying error kind
    pub fn kind(&self) -> &FdirError {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_field() {
        let err = FdirError::mask("dst_ipv6_mask", "byte 3 is 0x0f");
        assert_eq!(err.to_string(), "invalid mask: dst_ipv6_mask: byte 3 is 0x0f");
    }

    #[test]
    fn test_bringup_error_names_stage() {
        let err = BringUpError::new(
            Stage::Enable,
            FdirError::HardwareTimeout { register: 0x19500, polls: 10 },
        );
        let msg = err.to_string();
        assert!(msg.starts_with("flow director bring-up failed at enable"));
        assert!(msg.contains("10 polls"));
        assert!(matches!(err.kind(), FdirError::HardwareTimeout { polls: 10, .. }));
    }
}
