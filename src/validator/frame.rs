//! Stack frame lifecycle and exception handler scopes.

use beam_asm::{HeapNeed, Label, Register};

use super::Validator;
use crate::consts::MAX_YREG;
use crate::error::Fault;
use crate::state::{CatchTags, FrameSize, RegMap};
use crate::types::{LabelSet, Type};

impl Validator<'_> {
    pub(super) fn allocate(
        &mut self,
        live: u32,
        stack: u32,
        zero: bool,
        heap: Option<HeapNeed>,
    ) -> Result<(), Fault> {
        match self.st().numy {
            FrameSize::None => {}
            FrameSize::Undecided => return Err(Fault::UnknownSizeOfStackframe),
            FrameSize::Size(sz) => return Err(Fault::ExistingStackFrame(sz)),
        }
        if stack > MAX_YREG as u32 {
            return Err(Fault::Limit);
        }
        self.verify_live(live)?;
        // Allocation may collect.
        self.prune_x(live);
        self.kill_heap();
        let slot = if zero {
            Type::Initialized
        } else {
            Type::Uninitialized
        };
        let st = self.st_mut();
        st.numy = FrameSize::Size(stack);
        for n in 0..stack as u16 {
            st.y.set(n, slot.clone());
        }
        if let Some(heap) = heap {
            self.heap_alloc(&heap);
        }
        Ok(())
    }

    pub(super) fn test_heap(&mut self, heap: &HeapNeed, live: u32) -> Result<(), Fault> {
        self.verify_live(live)?;
        self.verify_y_init()?;
        self.prune_x(live);
        self.heap_alloc(heap);
        Ok(())
    }

    pub(super) fn deallocate(&mut self, n: u32) -> Result<(), Fault> {
        match self.st().ct.depth() {
            Some(0) => {}
            Some(d) => return Err(Fault::UnfinishedCatchTry(d)),
            None => return Err(Fault::UnknownCatchTryState),
        }
        match self.st().numy {
            FrameSize::Size(sz) if sz == n => {}
            FrameSize::Undecided => return Err(Fault::UnknownSizeOfStackframe),
            _ => return Err(Fault::StackFrame(n)),
        }
        let st = self.st_mut();
        st.numy = FrameSize::None;
        st.y = RegMap::default();
        st.defs
            .retain(|k, v| !matches!(k, Register::Y(_)) && !matches!(v.arg_reg(), Register::Y(_)));
        st.aliases
            .retain(|k, v| !matches!(k, Register::Y(_)) && !matches!(v, Register::Y(_)));
        Ok(())
    }

    pub(super) fn trim(&mut self, n: u32, remaining: u32) -> Result<(), Fault> {
        let frame = match self.st().numy {
            FrameSize::Size(sz) => sz,
            FrameSize::Undecided => return Err(Fault::UnknownSizeOfStackframe),
            FrameSize::None => 0,
        };
        if n.checked_add(remaining) != Some(frame) {
            return Err(Fault::Trim { n, frame });
        }
        // Handler tags cannot be trimmed away.
        for i in 0..n.min(MAX_YREG as u32) as u16 {
            match self.st().y.get(i) {
                Some(Type::Catchtag(_)) => return Err(Fault::Catchtag(Register::Y(i))),
                Some(Type::Trytag(_)) => return Err(Fault::Trytag(Register::Y(i))),
                _ => {}
            }
        }
        let mut y = RegMap::default();
        for i in 0..remaining.min(MAX_YREG as u32) as u16 {
            if let Some(t) = self.st().y.get(i + n as u16) {
                y.set(i, t.clone());
            }
        }
        let st = self.st_mut();
        st.y = y;
        st.numy = FrameSize::Size(remaining);
        // Slot indices shifted; anything keyed on a Y register is stale.
        st.defs
            .retain(|k, v| !matches!(k, Register::Y(_)) && !matches!(v.arg_reg(), Register::Y(_)));
        st.aliases
            .retain(|k, v| !matches!(k, Register::Y(_)) && !matches!(v, Register::Y(_)));
        Ok(())
    }

    /// `init`/`kill`: resets a stack slot to a harmless value.
    pub(super) fn clear_stack_slot(&mut self, dst: Register) -> Result<(), Fault> {
        if !matches!(dst, Register::Y(_)) {
            return Err(Fault::IllegalInstruction);
        }
        self.set_reg(dst, Type::Initialized)
    }

    pub(super) fn catch_or_try(
        &mut self,
        dst: Register,
        fail: Label,
        is_try: bool,
    ) -> Result<(), Fault> {
        let Register::Y(slot) = dst else {
            return Err(Fault::IllegalInstruction);
        };
        if fail == 0 {
            return Err(Fault::IllegalInstruction);
        }
        if matches!(self.st().ct, CatchTags::Undecided) {
            return Err(Fault::UnknownCatchTryState);
        }
        // Tags sit at strictly increasing slots from the outermost
        // handler inwards; a new tag below an enclosing one would
        // break the innermost-first scan.
        for (i, t) in self.st().y.iter() {
            if matches!(t, Type::Catchtag(_) | Type::Trytag(_)) && i >= slot {
                return Err(Fault::BadTryCatchNesting(dst));
            }
        }
        let set: LabelSet = [fail].into();
        let tag = if is_try {
            Type::Trytag(set.clone())
        } else {
            Type::Catchtag(set.clone())
        };
        self.set_reg(dst, tag)?;
        match &mut self.st_mut().ct {
            CatchTags::Stack(stack) => stack.push(set),
            CatchTags::Undecided => return Err(Fault::UnknownCatchTryState),
        }
        // The runtime delivers a well-formed frame to the handler,
        // and nothing useful in the X registers.
        self.branch_with(fail, |v| {
            let st = v.st_mut();
            for (_, t) in st.y.iter_mut() {
                if *t == Type::Uninitialized {
                    *t = Type::Term;
                }
            }
            st.x = RegMap::default();
            st.defs.clear();
            st.aliases.clear();
            Ok(())
        })
    }

    fn handler_end(&mut self, dst: Register, want_try: bool) -> Result<(), Fault> {
        let Register::Y(n) = dst else {
            return Err(Fault::IllegalInstruction);
        };
        let tag_set = match self.st().y.get(n) {
            Some(Type::Catchtag(s)) if !want_try => s.clone(),
            Some(Type::Trytag(s)) if want_try => s.clone(),
            _ if want_try => return Err(Fault::Trytag(dst)),
            _ => return Err(Fault::Catchtag(dst)),
        };
        match &mut self.st_mut().ct {
            CatchTags::Undecided => return Err(Fault::UnknownCatchTryState),
            CatchTags::Stack(stack) => match stack.pop() {
                Some(top) if top == tag_set => {}
                Some(_) | None => return Err(Fault::BadTryCatchNesting(dst)),
            },
        }
        self.write_type(dst, Type::Initialized);
        Ok(())
    }

    pub(super) fn catch_end(&mut self, dst: Register) -> Result<(), Fault> {
        self.handler_end(dst, false)?;
        // Only the catch result survives.
        self.prune_x(0);
        self.write_type(Register::X(0), Type::Term);
        Ok(())
    }

    pub(super) fn try_end(&mut self, dst: Register) -> Result<(), Fault> {
        // Normal exit from the protected body; the X registers hold
        // whatever the body left there.
        self.handler_end(dst, true)
    }

    pub(super) fn try_case(&mut self, dst: Register) -> Result<(), Fault> {
        self.handler_end(dst, true)?;
        // Handler entry: class, reason and stacktrace.
        self.prune_x(0);
        let st = self.st_mut();
        st.x.set(0, Type::Atom(None));
        st.x.set(1, Type::Term);
        st.x.set(2, Type::Term);
        Ok(())
    }
}
