//! The receive loop and message lifetime.
//!
//! A message delivered by `loop_rec` lives outside the heap root set
//! until `remove_message` roots it; until then it is fragile and must
//! never reach a stack slot.

use beam_asm::{Label, Register, Source};

use super::Validator;
use crate::error::Fault;
use crate::types::Type;

impl Validator<'_> {
    pub(super) fn send(&mut self) -> Result<(), Fault> {
        self.verify_live(2)?;
        self.verify_y_init()?;
        self.kill_heap();
        self.prune_x(0);
        self.st_mut().x.set(0, Type::Term);
        Ok(())
    }

    pub(super) fn loop_rec(&mut self, fail: Label, dst: Register) -> Result<(), Fault> {
        self.branch(fail)?;
        self.set_reg(dst, Type::Term.fragile())
    }

    pub(super) fn loop_rec_end(&mut self, l: Label) -> Result<(), Fault> {
        self.branch(l)?;
        self.kill();
        Ok(())
    }

    pub(super) fn wait(&mut self, l: Label) -> Result<(), Fault> {
        self.branch(l)?;
        self.kill();
        Ok(())
    }

    pub(super) fn wait_timeout(&mut self, fail: Label, src: &Source) -> Result<(), Fault> {
        self.assert_term(src)?;
        self.branch(fail)?;
        // Falls through once the timer fires; nothing in the X
        // registers survives the suspension.
        self.prune_x(0);
        Ok(())
    }

    pub(super) fn timeout(&mut self) -> Result<(), Fault> {
        self.prune_x(0);
        self.clear_fragility();
        Ok(())
    }

    pub(super) fn remove_message(&mut self) -> Result<(), Fault> {
        self.clear_fragility();
        Ok(())
    }

    fn clear_fragility(&mut self) {
        let st = self.st_mut();
        for (_, t) in st.x.iter_mut() {
            if t.is_fragile() {
                *t = t.strip_fragile().clone();
            }
        }
        for (_, t) in st.y.iter_mut() {
            if t.is_fragile() {
                *t = t.strip_fragile().clone();
            }
        }
    }
}
