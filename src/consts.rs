//! Implementation limits of the target emulator.

/// Highest addressable X register. Slot 1023 itself is reserved for
/// the loader.
pub const MAX_XREG: u16 = 1023;

/// Number of Y registers a stack frame may hold.
pub const MAX_YREG: u16 = 1024;

/// Number of float registers.
pub const MAX_FREG: u16 = 1024;
