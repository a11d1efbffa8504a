//! Error types for the machine layer.

use thermal::ThermalFault;
use thiserror::Error;

/// Why the machine latched itself off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    /// A fatal thermal condition (runaway, failed heating, sensor fault).
    Thermal(ThermalFault),
    /// An explicit emergency stop (M112 / kill pin).
    EmergencyStop,
}

#[derive(Error, Debug, PartialEq)]
pub enum MachineError {
    #[error("machine is killed ({0:?}); reset required")]
    Killed(KillReason),

    #[error("tool index {0} out of range")]
    InvalidTool(u8),
}

/// Line-discipline violations on the serial channel.
#[derive(Error, Debug, PartialEq)]
pub enum ProtocolError {
    #[error("expected line number {expected}, got {got}")]
    LineNumberMismatch { expected: u32, got: u32 },

    #[error("checksum mismatch: stated {stated}, computed {computed}")]
    ChecksumMismatch { stated: u8, computed: u8 },

    #[error("malformed line: {0}")]
    MalformedLine(String),
}

/// Failures loading a persisted settings image.
#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("settings image truncated: {0} bytes")]
    Truncated(usize),

    #[error("unknown settings version tag {0:?}")]
    UnknownVersion([u8; 4]),

    #[error("settings CRC mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    CrcMismatch { stored: u16, computed: u16 },
}
