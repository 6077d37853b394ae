//! User-facing rendering of diagnostics.
//!
//! Every diagnostic renders as a three-line explanation followed by
//! the offending instruction. Limit faults hint at refactoring
//! instead, and undefined labels are reported as what they are: a
//! compiler bug.

use core::fmt;

use crate::error::{Cause, Diagnostic, Fault};

fn hint(fault: &Fault) -> &'static str {
    match fault {
        Fault::UninitializedReg(_) | Fault::NotLive(_) => {
            "the emulator would read garbage from this register"
        }
        Fault::FragileMessageReference(_) => {
            "a garbage collection could reclaim the message while it is still in use"
        }
        Fault::Catchtag(_) | Fault::Trytag(_) | Fault::BadTryCatchNesting(_) => {
            "the exception handler bookkeeping on the stack would be corrupted"
        }
        Fault::HeapOverflow { .. } => "the build would write past the reserved heap area",
        Fault::BadFloatingPointState(_) | Fault::UnsafeInstruction => {
            "the floating point error flag would be read or clobbered out of order"
        }
        Fault::StackFrame(_)
        | Fault::Trim { .. }
        | Fault::ExistingStackFrame(_)
        | Fault::Allocated(_)
        | Fault::UnknownSizeOfStackframe => "the stack frame would be left in an inconsistent state",
        _ => "the emulator could crash or corrupt memory if this code ran",
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Cause::Instruction {
                instruction,
                offset,
                fault: Fault::Limit,
            } => {
                writeln!(f, "function {} exceeds an implementation limit", self.mfa)?;
                writeln!(f, "  at offset {offset}: a register or frame index is out of range")?;
                writeln!(
                    f,
                    "  rewrite the function to use fewer live values at one time"
                )?;
                write!(f, "    {instruction:?}")
            }
            Cause::Instruction {
                instruction,
                offset,
                fault,
            } => {
                writeln!(f, "function {} is unsafe", self.mfa)?;
                writeln!(f, "  at offset {offset}: {fault}")?;
                writeln!(f, "  {}", hint(fault))?;
                write!(f, "    {instruction:?}")
            }
            Cause::UndefLabels(labels) => {
                writeln!(
                    f,
                    "function {} references labels that are never defined: {labels:?}",
                    self.mfa
                )?;
                writeln!(f, "  this is an internal consistency error")?;
                write!(f, "  please report this as a compiler bug")
            }
        }
    }
}
