//! The float register bank.
//!
//! The error-state automaton itself lives in the tier-3 gate; these
//! are the transfer functions for moves in and out of the bank and
//! for the arithmetic inside a block.

use beam_asm::{Operand, Source};

use super::Validator;
use crate::consts::MAX_FREG;
use crate::error::Fault;
use crate::types::{FloatState, Type};

const FLOAT_ARITH: [&str; 5] = ["fadd", "fsub", "fmul", "fdiv", "fnegate"];

impl Validator<'_> {
    pub(super) fn fconv(&mut self, src: &Source, dst: u16) -> Result<(), Fault> {
        self.assert_type(&Type::Number, src)?;
        self.init_freg(dst)
    }

    pub(super) fn fmove(&mut self, src: &Operand, dst: &Operand) -> Result<(), Fault> {
        match (src.fr(), dst.fr()) {
            // Out of the bank; boxes one float on the heap.
            (Some(fr), None) => {
                self.assert_freg(fr)?;
                let Some(dreg) = dst.register() else {
                    return Err(Fault::InvalidStore(dst.clone()));
                };
                self.consume_float_heap(1)?;
                self.set_reg(dreg, Type::Float(None))
            }
            // Into the bank; the source must already be a float.
            (None, Some(fr)) => {
                let s = src.source().ok_or(Fault::IllegalInstruction)?;
                self.assert_type(&Type::Float(None), &s)?;
                self.init_freg(fr)
            }
            (Some(a), Some(b)) => {
                self.assert_freg(a)?;
                self.init_freg(b)
            }
            (None, None) => Err(Fault::IllegalInstruction),
        }
    }

    pub(super) fn float_arith(
        &mut self,
        op: &str,
        args: &[Operand],
        dst: &Operand,
    ) -> Result<(), Fault> {
        if !FLOAT_ARITH.contains(&op) {
            return Err(Fault::IllegalInstruction);
        }
        match self.st().fls {
            FloatState::Cleared => {}
            fls => return Err(Fault::BadFloatingPointState(fls)),
        }
        for a in args {
            let fr = a.fr().ok_or(Fault::IllegalInstruction)?;
            self.assert_freg(fr)?;
        }
        let fr = dst.fr().ok_or(Fault::IllegalInstruction)?;
        self.init_freg(fr)
    }

    fn assert_freg(&self, fr: u16) -> Result<(), Fault> {
        if fr >= MAX_FREG {
            return Err(Fault::Limit);
        }
        if self.st().f.contains(&fr) {
            Ok(())
        } else {
            Err(Fault::UninitializedReg(Operand::Fr(fr)))
        }
    }

    fn init_freg(&mut self, fr: u16) -> Result<(), Fault> {
        if fr >= MAX_FREG {
            return Err(Fault::Limit);
        }
        self.st_mut().f.insert(fr);
        Ok(())
    }
}
