//! Binary matching and construction.

use beam_asm::{HeapNeed, Label, Operand, Register, SavePoint, Source};

use super::Validator;
use crate::error::Fault;
use crate::types::{MatchCtx, Type};

/// Save slots fit in the context's validity mask.
const MAX_SLOTS: u32 = 64;

impl Validator<'_> {
    fn bsm_ctx(&self, src: &Source) -> Result<MatchCtx, Fault> {
        match Self::raw_read(self.st(), src)? {
            Type::MatchContext(m) => Ok(m),
            _ => Err(Fault::NoBsmContext(src.clone().into())),
        }
    }

    pub(super) fn bs_start_match(
        &mut self,
        fail: Label,
        live: u32,
        src: &Operand,
        slots: u32,
        dst: Register,
    ) -> Result<(), Fault> {
        self.verify_live(live)?;
        if slots > MAX_SLOTS {
            return Err(Fault::Limit);
        }
        let src = src.source().ok_or_else(|| Fault::BadSource(src.clone()))?;
        let resumed = src.reg() == Some(dst)
            && matches!(
                Self::raw_read(self.st(), &src),
                Ok(Type::MatchContext(_))
            );
        if resumed {
            // Resuming an existing context in place. On the failure
            // path the context must not be observable.
            self.branch_with(fail, |v| {
                v.write_type(dst, Type::Term);
                Ok(())
            })
        } else {
            self.assert_term(&src)?;
            self.prune_x(live);
            self.branch(fail)?;
            let id = self.vst.ids.fresh();
            self.set_reg(
                dst,
                Type::MatchContext(MatchCtx {
                    id,
                    valid: 0,
                    slots,
                }),
            )
        }
    }

    pub(super) fn bs_save(&mut self, ctx: &Source, slot: SavePoint) -> Result<(), Fault> {
        let m = self.bsm_ctx(ctx)?;
        let SavePoint::Slot(n) = slot else {
            // The start position is always available.
            return Ok(());
        };
        if n >= m.slots {
            return Err(Fault::IllegalSave(n));
        }
        let Some(reg) = ctx.reg() else {
            return Err(Fault::BadSource(ctx.clone().into()));
        };
        self.write_type(reg, Type::MatchContext(m.with_saved(n)));
        Ok(())
    }

    pub(super) fn bs_restore(&mut self, ctx: &Source, slot: SavePoint) -> Result<(), Fault> {
        let m = self.bsm_ctx(ctx)?;
        if let SavePoint::Slot(n) = slot {
            if n >= m.slots || !m.has_saved(n) {
                return Err(Fault::IllegalRestore(n));
            }
        }
        Ok(())
    }

    pub(super) fn context_to_binary(&mut self, src: &Source) -> Result<(), Fault> {
        let Some(reg) = src.reg() else {
            return Err(Fault::BadSource(src.clone().into()));
        };
        if let Type::MatchContext(_) = self.get_move_type(src)? {
            self.set_reg(reg, Type::Binary)?;
        }
        Ok(())
    }

    /// A plain two-way test over a context.
    pub(super) fn bs_test(&mut self, fail: Label, ctx: &Source) -> Result<(), Fault> {
        self.bsm_ctx(ctx)?;
        self.branch(fail)
    }

    pub(super) fn bs_skip_utf(&mut self, fail: Label, ctx: &Source, live: u32) -> Result<(), Fault> {
        self.bsm_ctx(ctx)?;
        self.verify_live(live)?;
        self.branch(fail)?;
        self.prune_x(live);
        Ok(())
    }

    /// Shared shape of the extraction tests: collect, branch, write.
    pub(super) fn bs_get(
        &mut self,
        fail: Label,
        live: u32,
        ctx: &Source,
        size: Option<&Source>,
        ty: Type,
        dst: Register,
    ) -> Result<(), Fault> {
        self.bsm_ctx(ctx)?;
        if let Some(size) = size {
            self.assert_term(size)?;
        }
        self.verify_live(live)?;
        self.kill_heap();
        self.prune_x(live);
        self.branch(fail)?;
        self.set_reg(dst, ty)
    }

    // ---- construction -------------------------------------------------

    pub(super) fn bs_init(
        &mut self,
        fail: Label,
        size: &Source,
        heap: u32,
        live: u32,
        dst: Register,
    ) -> Result<(), Fault> {
        self.assert_term(size)?;
        self.verify_live(live)?;
        self.verify_y_init()?;
        self.heap_alloc(&HeapNeed::Words(heap));
        self.branch(fail)?;
        self.prune_x(live);
        self.set_reg(dst, Type::Binary)
    }

    pub(super) fn bs_append(
        &mut self,
        fail: Label,
        size: &Source,
        heap: u32,
        live: u32,
        src: &Source,
        dst: Register,
    ) -> Result<(), Fault> {
        self.assert_term(size)?;
        self.assert_term(src)?;
        self.verify_live(live)?;
        self.verify_y_init()?;
        self.heap_alloc(&HeapNeed::Words(heap));
        self.branch(fail)?;
        self.prune_x(live);
        if let Some(r) = src.reg() {
            self.refine_reg_soft(r, &Type::Binary);
        }
        self.set_reg(dst, Type::Binary)
    }

    pub(super) fn bs_private_append(
        &mut self,
        fail: Label,
        size: &Source,
        src: &Source,
        dst: Register,
    ) -> Result<(), Fault> {
        self.assert_term(size)?;
        self.assert_term(src)?;
        self.branch(fail)?;
        if let Some(r) = src.reg() {
            self.refine_reg_soft(r, &Type::Binary);
        }
        self.set_reg(dst, Type::Binary)
    }

    pub(super) fn bs_put(
        &mut self,
        fail: Label,
        size: Option<&Source>,
        src: &Source,
    ) -> Result<(), Fault> {
        if let Some(size) = size {
            self.assert_term(size)?;
        }
        self.assert_term(src)?;
        self.branch(fail)
    }

    pub(super) fn bs_add(
        &mut self,
        fail: Label,
        a: &Source,
        b: &Source,
        dst: Register,
    ) -> Result<(), Fault> {
        self.assert_term(a)?;
        self.assert_term(b)?;
        self.branch(fail)?;
        self.set_reg(dst, Type::Integer(None))
    }

    pub(super) fn bs_utf_size(
        &mut self,
        fail: Label,
        src: &Source,
        dst: Register,
    ) -> Result<(), Fault> {
        self.assert_term(src)?;
        self.branch(fail)?;
        self.set_reg(dst, Type::Integer(None))
    }
}
