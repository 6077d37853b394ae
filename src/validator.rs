//! The per-function abstract interpreter.
//!
//! Each instruction is dispatched through four tiers, mirroring how
//! permissive the instruction is: tier 1 is always legal, tier 2
//! forks the state of instructions that can raise into the innermost
//! exception handler, tier 3 is the floating point gate, and tier 4
//! carries everything else. The first tier that claims an opcode
//! handles it.

mod bif;
mod bits;
mod float;
mod flow;
mod frame;
mod map;
mod message;
mod tuple;

use std::panic::{self, AssertUnwindSafe};

use beam_asm::{Function, HeapNeed, Instruction, Label, Module, Operand, Register, Source};

use crate::consts::{MAX_XREG, MAX_YREG};
use crate::error::{Cause, Diagnostic, Fault, ValidateError};
use crate::extension::Options;
use crate::prescan::EntryIndex;
use crate::state::{CatchTags, Def, FrameSize, St, Vst};
use crate::types::{meet, FloatState, Type};

/// Verifies a whole module with default options.
///
/// On success the module is usable as-is; on failure one diagnostic
/// is reported per rejected function, in definition order.
pub fn validate(module: &Module) -> Result<(), ValidateError> {
    validate_with(module, &Options::default())
}

/// Verifies a whole module.
pub fn validate_with(module: &Module, options: &Options) -> Result<(), ValidateError> {
    let ft = EntryIndex::build(module.functions());
    let mut diagnostics = Vec::new();
    for function in module.functions() {
        let mfa = function.mfa(module.name());
        tracing::debug!(function = %mfa, "validating");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            validate_function(module.name(), function, &ft, options)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(cause)) => diagnostics.push(Diagnostic { mfa, cause }),
            Err(payload) => {
                tracing::error!(function = %mfa, "internal error while validating");
                panic::resume_unwind(payload);
            }
        }
    }
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(ValidateError {
            module: module.name().to_string(),
            diagnostics,
        })
    }
}

/// Verifies a single function against a prebuilt entry index.
pub fn validate_function(
    module: &str,
    function: &Function,
    ft: &EntryIndex,
    options: &Options,
) -> Result<(), Cause> {
    let code = function.code();

    // Header: a run of labels, one func_info, another run of labels
    // that must contain the declared entry.
    let mut pos = 0;
    let mut ls1 = Vec::new();
    while let Some(Instruction::Label(l)) = code.get(pos) {
        ls1.push(*l);
        pos += 1;
    }
    let func_info_at = pos;
    let func_info = match code.get(pos) {
        Some(i @ Instruction::FuncInfo { .. }) => i.clone(),
        other => {
            let instruction = other.cloned().unwrap_or(Instruction::IfEnd);
            return Err(Cause::Instruction {
                instruction,
                offset: pos,
                fault: Fault::IllegalInstruction,
            });
        }
    };
    pos += 1;
    let mut ls2 = Vec::new();
    while let Some(Instruction::Label(l)) = code.get(pos) {
        ls2.push(*l);
        pos += 1;
    }
    if !ls2.contains(&function.entry()) {
        return Err(Cause::Instruction {
            instruction: func_info,
            offset: func_info_at,
            fault: Fault::NoEntryLabel(function.entry()),
        });
    }

    let mut v = Validator {
        vst: Vst::new(function.arity()),
        ft,
        options,
        arity: function.arity(),
        setelem_ok: false,
    };
    for l in &ls1 {
        v.vst.labels.insert(*l);
    }

    // The entry labels themselves run through the dispatcher so their
    // states are recorded like any other join point.
    for (offset, instruction) in code.iter().enumerate().skip(func_info_at + 1) {
        if let Err(fault) = v.step(instruction) {
            return Err(Cause::Instruction {
                instruction: instruction.clone(),
                offset,
                fault,
            });
        }
    }

    let undef = v.vst.undefined_labels();
    if !undef.is_empty() {
        return Err(Cause::UndefLabels(undef));
    }

    tracing::trace!(module, function = function.name(), "function body verified");

    // Nothing reaching the entry stub may carry a frame or clobbered
    // arguments, or the generic error path would misbehave.
    for l in ls1 {
        if let Err(fault) = v.check_fun_info_branch(l) {
            return Err(Cause::Instruction {
                instruction: func_info.clone(),
                offset: func_info_at,
                fault,
            });
        }
    }
    Ok(())
}

/// Tier 2 membership: the instructions that can themselves raise and
/// must therefore fork the state into the innermost handler. That is
/// the call family, which includes the exception-only external calls
/// such as `erlang:error/1`.
fn can_raise(i: &Instruction) -> bool {
    use Instruction::*;
    matches!(
        i,
        Call { .. }
            | CallLast { .. }
            | CallOnly { .. }
            | CallExt { .. }
            | CallExtLast { .. }
            | CallExtOnly { .. }
            | CallFun { .. }
            | Apply { .. }
            | ApplyLast { .. }
    )
}

/// Per-function verifier: the state machine plus everything the
/// transfer functions need to consult.
pub struct Validator<'a> {
    pub(crate) vst: Vst,
    pub(crate) ft: &'a EntryIndex,
    pub(crate) options: &'a Options,
    pub(crate) arity: usize,
    /// Whether the previous instruction was `setelement/3`, sampled
    /// before the flag is cleared for the current one.
    pub(crate) setelem_ok: bool,
}

impl Validator<'_> {
    /// Applies one instruction to the current state.
    pub(crate) fn step(&mut self, i: &Instruction) -> Result<(), Fault> {
        if self.vst.current.is_none() {
            // Dead stream: only a label can revive it.
            if let Instruction::Label(l) = i {
                self.vst.define_label(*l);
            }
            return Ok(());
        }
        if self.st().puts_left.is_some()
            && !matches!(
                i,
                Instruction::Put(_) | Instruction::Line(_) | Instruction::Comment(_)
            )
        {
            return Err(Fault::NotBuildingATuple);
        }
        self.setelem_ok = self.st().setelem;
        if !matches!(i, Instruction::Line(_) | Instruction::Comment(_)) {
            self.st_mut().setelem = false;
        }

        if self.vi_1(i)? {
            return Ok(());
        }
        if can_raise(i) {
            self.branch_exception()?;
        }
        if self.vi_3(i)? {
            return Ok(());
        }
        self.vi_4(i)
    }

    /// Tier 1: instructions that are always legal.
    fn vi_1(&mut self, i: &Instruction) -> Result<bool, Fault> {
        use Instruction::*;
        match i {
            Label(l) => {
                self.vst.define_label(*l);
                if self.vst.current.is_none() {
                    tracing::trace!(label = l, "label has no incoming state");
                }
            }
            Line(_) | Comment(_) => {}
            // The entry stub; running into it raises.
            FuncInfo { .. } => self.kill(),
            Badmatch(src) | CaseEnd(src) | TryCaseEnd(src) => {
                self.assert_term(src)?;
                self.verify_y_init()?;
                self.kill();
            }
            IfEnd => {
                self.verify_y_init()?;
                self.kill();
            }
            Move { src, dst } => self.move_reg(src, *dst)?,
            Init(dst) | Kill(dst) => self.clear_stack_slot(*dst)?,
            Trim { n, remaining } => self.trim(*n, *remaining)?,
            TestHeap { heap, live } => self.test_heap(heap, *live)?,
            Allocate { live, stack } => self.allocate(*live, *stack, false, None)?,
            AllocateZero { live, stack } => self.allocate(*live, *stack, true, None)?,
            AllocateHeap { live, heap, stack } => {
                self.allocate(*live, *stack, false, Some(*heap))?
            }
            AllocateHeapZero { live, heap, stack } => {
                self.allocate(*live, *stack, true, Some(*heap))?
            }
            Deallocate(n) => self.deallocate(*n)?,
            Bif { op, fail, args, dst } if *fail == 0 && !bif::touches_floats(args, dst) => {
                self.pure_bif(op, args, dst)?
            }
            PutList { head, tail, dst } => self.put_list(head, tail, *dst)?,
            PutTuple { arity, dst } => self.put_tuple(*arity, *dst)?,
            Put(src) => self.put(src)?,
            PutTuple2 { dst, elements } => self.put_tuple2(*dst, elements)?,
            GetList { src, hd, tl } => self.get_list(src, *hd, *tl)?,
            GetTupleElement { src, index, dst } => self.get_tuple_element(src, *index, *dst)?,
            Catch { dst, fail } => self.catch_or_try(*dst, *fail, false)?,
            Try { dst, fail } => self.catch_or_try(*dst, *fail, true)?,
            CatchEnd(dst) => self.catch_end(*dst)?,
            TryEnd(dst) => self.try_end(*dst)?,
            TryCase(dst) => self.try_case(*dst)?,
            RecvMark(_) => {}
            RecvSet(l) => self.branch(*l)?,
            BsContextToBinary(src) => self.context_to_binary(src)?,
            Fconv { src, dst } => self.fconv(src, *dst)?,
            Fmove { src, dst } => self.fmove(src, dst)?,
            Jump(l) => {
                self.branch(*l)?;
                self.kill();
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Tier 3: the floating point gate. Claims the float-state
    /// opcodes and float arithmetic; everything else must run with
    /// the error state undefined or checked.
    fn vi_3(&mut self, i: &Instruction) -> Result<bool, Fault> {
        use Instruction::*;
        match i {
            Fclearerror => {
                match self.st().fls {
                    FloatState::Undefined | FloatState::Checked => {}
                    fls => return Err(Fault::BadFloatingPointState(fls)),
                }
                self.st_mut().fls = FloatState::Cleared;
                Ok(true)
            }
            Fcheckerror(fail) => {
                match self.st().fls {
                    FloatState::Cleared => {}
                    fls => return Err(Fault::BadFloatingPointState(fls)),
                }
                self.branch(*fail)?;
                self.st_mut().fls = FloatState::Checked;
                Ok(true)
            }
            Bif { op, args, dst, .. } if bif::touches_floats(args, dst) => {
                self.float_arith(op, args, dst)?;
                Ok(true)
            }
            _ if self.st().fls == FloatState::Cleared => Err(Fault::UnsafeInstruction),
            _ => Ok(false),
        }
    }

    /// Tier 4: everything else. Unknown opcodes end up at the
    /// extension registry.
    fn vi_4(&mut self, i: &Instruction) -> Result<(), Fault> {
        use Instruction::*;
        match i {
            Return => self.ret(),
            Call { arity, label } => self.call_local(*arity, *label),
            CallLast {
                arity,
                label,
                dealloc,
            } => self.tail_call_local(*arity, *label, Some(*dealloc)),
            CallOnly { arity, label } => self.tail_call_local(*arity, *label, None),
            CallExt { arity, func } => self.call_ext(*arity, func),
            CallExtLast {
                arity,
                func,
                dealloc,
            } => self.tail_call_ext(*arity, func, Some(*dealloc)),
            CallExtOnly { arity, func } => self.tail_call_ext(*arity, func, None),
            CallFun { arity } => self.call_fun(*arity),
            Apply { arity } => self.apply(*arity, None),
            ApplyLast { arity, dealloc } => self.apply(*arity, Some(*dealloc)),
            SelectVal { src, fail, list } => self.select_val(src, *fail, list),
            SelectTupleArity { src, fail, list } => self.select_tuple_arity(src, *fail, list),
            Bif { op, fail, args, dst } => self.branching_bif(op, *fail, args, dst),
            GcBif {
                op,
                fail,
                live,
                args,
                dst,
            } => self.gc_bif(op, *fail, *live, args, *dst),
            Send => self.send(),
            LoopRec { fail, dst } => self.loop_rec(*fail, *dst),
            LoopRecEnd(l) => self.loop_rec_end(*l),
            Wait(l) => self.wait(*l),
            WaitTimeout { fail, src } => self.wait_timeout(*fail, src),
            Timeout => self.timeout(),
            RemoveMessage => self.remove_message(),
            SetTupleElement { src, tuple, index } => self.set_tuple_element(src, tuple, *index),
            BsStartMatch2 {
                fail,
                live,
                src,
                slots,
                dst,
            } => self.bs_start_match(*fail, *live, src, *slots, *dst),
            BsSave2 { ctx, slot } => self.bs_save(ctx, *slot),
            BsRestore2 { ctx, slot } => self.bs_restore(ctx, *slot),
            BsMatchString { fail, ctx, .. }
            | BsSkipBits2 { fail, ctx, .. }
            | BsTestTail2 { fail, ctx, .. }
            | BsTestUnit { fail, ctx, .. } => self.bs_test(*fail, ctx),
            BsSkipUtf8 { fail, ctx, live }
            | BsSkipUtf16 { fail, ctx, live }
            | BsSkipUtf32 { fail, ctx, live } => self.bs_skip_utf(*fail, ctx, *live),
            BsGetInteger2 {
                fail,
                live,
                ctx,
                size,
                dst,
                ..
            } => self.bs_get(*fail, *live, ctx, Some(size), Type::Integer(None), *dst),
            BsGetFloat2 {
                fail,
                live,
                ctx,
                size,
                dst,
                ..
            } => self.bs_get(*fail, *live, ctx, Some(size), Type::Float(None), *dst),
            BsGetBinary2 {
                fail,
                live,
                ctx,
                size,
                dst,
                ..
            } => self.bs_get(*fail, *live, ctx, Some(size), Type::Binary, *dst),
            BsGetUtf8 {
                fail,
                live,
                ctx,
                dst,
            }
            | BsGetUtf16 {
                fail,
                live,
                ctx,
                dst,
            }
            | BsGetUtf32 {
                fail,
                live,
                ctx,
                dst,
            } => self.bs_get(*fail, *live, ctx, None, Type::Integer(None), *dst),
            BsInit2 {
                fail,
                size,
                heap,
                live,
                dst,
                ..
            }
            | BsInitBits {
                fail,
                size,
                heap,
                live,
                dst,
                ..
            } => self.bs_init(*fail, size, *heap, *live, *dst),
            BsAppend {
                fail,
                size,
                heap,
                live,
                src,
                dst,
                ..
            } => self.bs_append(*fail, size, *heap, *live, src, *dst),
            BsPrivateAppend {
                fail, size, src, dst, ..
            } => self.bs_private_append(*fail, size, src, *dst),
            BsPutInteger {
                fail, size, src, ..
            }
            | BsPutFloat {
                fail, size, src, ..
            }
            | BsPutBinary {
                fail, size, src, ..
            } => self.bs_put(*fail, Some(size), src),
            BsPutString { .. } => Ok(()),
            BsPutUtf8 { fail, src } | BsPutUtf16 { fail, src } | BsPutUtf32 { fail, src } => {
                self.bs_put(*fail, None, src)
            }
            BsAdd { fail, a, b, dst, .. } => self.bs_add(*fail, a, b, *dst),
            BsUtf8Size { fail, src, dst } | BsUtf16Size { fail, src, dst } => {
                self.bs_utf_size(*fail, src, *dst)
            }
            IsFloat { fail, src } => self.type_test(*fail, src, Type::Float(None)),
            IsTuple { fail, src } => self.type_test(*fail, src, Type::Tuple(crate::types::Arity::AtLeast(0))),
            IsNonemptyList { fail, src } => self.type_test(*fail, src, Type::Cons),
            IsMap { fail, src } => self.type_test(*fail, src, Type::Map),
            TestArity { fail, src, arity } => {
                self.type_test(*fail, src, Type::Tuple(crate::types::Arity::Exact(*arity)))
            }
            IsTaggedTuple {
                fail, src, arity, ..
            } => self.type_test(*fail, src, Type::Tuple(crate::types::Arity::Exact(*arity))),
            IsEqExact { fail, a, b } => self.is_eq_exact(*fail, a, b),
            HasMapFields { fail, src, keys } => self.has_map_fields(*fail, src, keys),
            Test { fail, args, .. } => self.generic_test(*fail, args),
            PutMapAssoc {
                fail,
                src,
                dst,
                live,
                list,
            }
            | PutMapExact {
                fail,
                src,
                dst,
                live,
                list,
            } => self.put_map(*fail, src, *dst, *live, list),
            GetMapElements { fail, src, list } => self.get_map_elements(*fail, src, list),
            Custom { name, args } => self.custom(name, args),
            // Claimed by an earlier tier.
            _ => Err(Fault::IllegalInstruction),
        }
    }

    // ---- state access -------------------------------------------------

    pub(crate) fn st(&self) -> &St {
        self.vst.current.as_ref().expect("instruction stream is live")
    }

    pub(crate) fn st_mut(&mut self) -> &mut St {
        self.vst.current.as_mut().expect("instruction stream is live")
    }

    pub(crate) fn kill(&mut self) {
        self.vst.current = None;
    }

    /// Reads a source without any of the term restrictions.
    pub(crate) fn raw_read(st: &St, src: &Source) -> Result<Type, Fault> {
        match src.reg() {
            Some(Register::X(n)) => {
                if n >= MAX_XREG {
                    return Err(Fault::Limit);
                }
                st.x.get(n)
                    .cloned()
                    .ok_or(Fault::UninitializedReg(Operand::X(n)))
            }
            Some(Register::Y(n)) => {
                if n >= MAX_YREG {
                    return Err(Fault::Limit);
                }
                st.y.get(n)
                    .cloned()
                    .ok_or(Fault::UninitializedReg(Operand::Y(n)))
            }
            None => Type::of_immediate(src).ok_or_else(|| Fault::BadSource(src.clone().into())),
        }
    }

    /// The type of a source for a plain data move. Handler tags and
    /// half-built tuples are never movable; match contexts are.
    pub(crate) fn get_move_type(&self, src: &Source) -> Result<Type, Fault> {
        let t = Self::raw_read(self.st(), src)?;
        let reg = src.reg();
        match t {
            Type::Uninitialized => Err(Fault::UninitializedReg(src.clone().into())),
            Type::Catchtag(_) => Err(Fault::Catchtag(reg.ok_or(Fault::IllegalInstruction)?)),
            Type::Trytag(_) => Err(Fault::Trytag(reg.ok_or(Fault::IllegalInstruction)?)),
            Type::TupleInProgress => Err(Fault::TupleInProgress),
            Type::Exception => Err(Fault::BadSource(src.clone().into())),
            Type::Initialized => Ok(Type::Term),
            t => Ok(t),
        }
    }

    /// The type of a source used as a plain term. Match contexts are
    /// additionally rejected.
    pub(crate) fn get_type(&self, src: &Source) -> Result<Type, Fault> {
        match self.get_move_type(src)? {
            Type::MatchContext(_) => Err(Fault::MatchContext(src.clone().into())),
            t => Ok(t),
        }
    }

    pub(crate) fn assert_term(&self, src: &Source) -> Result<(), Fault> {
        self.get_type(src).map(|_| ())
    }

    /// Checks that the source could have the needed type.
    pub(crate) fn assert_type(&self, needed: &Type, src: &Source) -> Result<(), Fault> {
        let actual = self.get_type(src)?;
        match meet(&actual, needed) {
            Some(_) => Ok(()),
            None => Err(Fault::BadType {
                needed: needed.clone(),
                actual,
            }),
        }
    }

    /// Narrows a register (and its alias) on the success path of a
    /// test. Immediates are merely checked.
    pub(crate) fn refine_source(&mut self, src: &Source, needed: &Type) -> Result<(), Fault> {
        let actual = self.get_type(src)?;
        let refined = match meet(&actual, needed) {
            Some(t) => t,
            None => {
                return Err(Fault::BadType {
                    needed: needed.clone(),
                    actual,
                })
            }
        };
        if let Some(r) = src.reg() {
            self.write_type(r, refined.clone());
            if let Some(&other) = self.st().aliases.get(&r) {
                self.write_type(other, refined);
            }
        }
        Ok(())
    }

    /// Overwrites a register with a new value's type, invalidating
    /// everything that referred to the old value.
    pub(crate) fn set_reg(&mut self, dst: Register, ty: Type) -> Result<(), Fault> {
        match dst {
            Register::X(n) => {
                if n >= MAX_XREG {
                    return Err(Fault::Limit);
                }
            }
            Register::Y(n) => {
                if n >= MAX_YREG {
                    return Err(Fault::Limit);
                }
                match self.st().numy {
                    FrameSize::Size(sz) if (n as u32) < sz => {}
                    FrameSize::Undecided => return Err(Fault::UnknownSizeOfStackframe),
                    _ => return Err(Fault::InvalidStore(Operand::Y(n))),
                }
                if ty.is_fragile() {
                    return Err(Fault::FragileMessageReference(dst));
                }
                match self.st().y.get(n) {
                    Some(Type::Catchtag(_)) => return Err(Fault::Catchtag(dst)),
                    Some(Type::Trytag(_)) => return Err(Fault::Trytag(dst)),
                    _ => {}
                }
            }
        }
        self.forget(dst);
        self.write_type(dst, ty);
        Ok(())
    }

    /// Like [`Validator::set_reg`] but also records the defining
    /// instruction for later refinement.
    pub(crate) fn set_reg_with_def(
        &mut self,
        dst: Register,
        ty: Type,
        def: Def,
    ) -> Result<(), Fault> {
        self.set_reg(dst, ty)?;
        if !def.references(dst) {
            self.st_mut().defs.insert(dst, def);
        }
        Ok(())
    }

    /// Raw type update that keeps defs and aliases: the value is
    /// unchanged, only its type got sharper.
    pub(crate) fn write_type(&mut self, r: Register, ty: Type) {
        let st = self.st_mut();
        match r {
            Register::X(n) => st.x.set(n, ty),
            Register::Y(n) => st.y.set(n, ty),
        }
    }

    fn forget(&mut self, r: Register) {
        let st = self.st_mut();
        st.defs.retain(|k, v| *k != r && !v.references(r));
        if let Some(p) = st.aliases.remove(&r) {
            st.aliases.remove(&p);
        }
    }

    /// Records that two registers hold the same term.
    pub(crate) fn alias(&mut self, a: Register, b: Register) {
        let st = self.st_mut();
        st.aliases.insert(a, b);
        st.aliases.insert(b, a);
    }

    /// Drops every X register at `live` or above, along with stale
    /// defs and aliases.
    pub(crate) fn prune_x(&mut self, live: u32) {
        let below = |r: &Register| match r {
            Register::X(n) => (*n as u32) < live,
            Register::Y(_) => true,
        };
        let st = self.st_mut();
        st.x.retain_below(live.min(u16::MAX as u32) as u16);
        st.defs.retain(|k, v| below(k) && below(&v.arg_reg()));
        st.aliases.retain(|k, v| below(k) && below(v));
    }

    /// Checks the declared live count and that every register under
    /// it is populated.
    pub(crate) fn verify_live(&self, live: u32) -> Result<(), Fault> {
        if live > MAX_XREG as u32 {
            return Err(Fault::BadNumberOfLiveRegs(live));
        }
        for n in 0..live as u16 {
            if self.st().x.get(n).is_none() {
                return Err(Fault::NotLive(Register::X(n)));
            }
        }
        Ok(())
    }

    /// GC safety: every stack slot must hold something the collector
    /// can walk.
    pub(crate) fn verify_y_init(&self) -> Result<(), Fault> {
        match self.st().numy {
            FrameSize::None => Ok(()),
            FrameSize::Undecided => Err(Fault::UnknownSizeOfStackframe),
            FrameSize::Size(sz) => {
                for n in 0..sz.min(MAX_YREG as u32) as u16 {
                    match self.st().y.get(n) {
                        Some(t) if t.is_gc_safe() => {}
                        _ => return Err(Fault::UninitializedReg(Operand::Y(n))),
                    }
                }
                Ok(())
            }
        }
    }

    // ---- resources ----------------------------------------------------

    pub(crate) fn heap_alloc(&mut self, heap: &HeapNeed) {
        let st = self.st_mut();
        st.h = heap.words();
        st.hf = heap.floats();
    }

    pub(crate) fn kill_heap(&mut self) {
        let st = self.st_mut();
        st.h = 0;
        st.hf = 0;
    }

    pub(crate) fn consume_heap(&mut self, needed: u32) -> Result<(), Fault> {
        let st = self.st_mut();
        if st.h < needed {
            return Err(Fault::HeapOverflow {
                needed,
                left: st.h,
            });
        }
        st.h -= needed;
        Ok(())
    }

    pub(crate) fn consume_float_heap(&mut self, needed: u32) -> Result<(), Fault> {
        let st = self.st_mut();
        if st.hf < needed {
            return Err(Fault::HeapOverflow {
                needed,
                left: st.hf,
            });
        }
        st.hf -= needed;
        Ok(())
    }

    // ---- branching ----------------------------------------------------

    /// Merges the current state into a branch target. Label 0 raises
    /// at run time instead of jumping; the state only has to be safe
    /// to unwind.
    pub(crate) fn branch(&mut self, l: Label) -> Result<(), Fault> {
        if l == 0 {
            return self.verify_y_init();
        }
        let st = self.st().clone();
        self.vst.record_branch(l, &st);
        Ok(())
    }

    /// Branches with an edited copy of the current state, restoring
    /// the fall-through state afterwards.
    pub(crate) fn branch_with(
        &mut self,
        l: Label,
        edit: impl FnOnce(&mut Self) -> Result<(), Fault>,
    ) -> Result<(), Fault> {
        if l == 0 {
            return self.verify_y_init();
        }
        let saved = self.st().clone();
        edit(self)?;
        let st = self.st().clone();
        self.vst.record_branch(l, &st);
        *self.st_mut() = saved;
        Ok(())
    }

    /// Tier 2: an instruction that may raise forks the state into the
    /// innermost handler, which must therefore be unambiguous.
    pub(crate) fn branch_exception(&mut self) -> Result<(), Fault> {
        let target = match &self.st().ct {
            CatchTags::Undecided => return Err(Fault::UnknownCatchTryState),
            CatchTags::Stack(stack) => match stack.last() {
                None => return Ok(()),
                Some(set) if set.len() == 1 => set.iter().next().copied(),
                Some(_) => return Err(Fault::AmbiguousCatchTryState),
            },
        };
        match target {
            Some(l) => self.branch(l),
            None => Ok(()),
        }
    }

    // ---- fun-info branches --------------------------------------------

    /// A label before `func_info` may only be reached with the frame
    /// gone and all arguments intact.
    fn check_fun_info_branch(&mut self, l: Label) -> Result<(), Fault> {
        let Some(st) = self.vst.branched.get(&l) else {
            return Ok(());
        };
        match st.numy {
            FrameSize::None => {}
            FrameSize::Undecided => return Err(Fault::UnknownSizeOfStackframe),
            FrameSize::Size(sz) => return Err(Fault::ExistingStackFrame(sz)),
        }
        for n in 0..self.arity.min(MAX_XREG as usize) as u16 {
            match st.x.get(n) {
                None | Some(Type::Uninitialized) => {
                    return Err(Fault::UninitializedReg(Operand::X(n)))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    // ---- extension point ----------------------------------------------

    fn custom(&mut self, name: &str, args: &[Operand]) -> Result<(), Fault> {
        match self.options.handler_for(name) {
            Some(handler) => {
                let mut view = crate::extension::StateView::new(self);
                match handler.validate(args, &mut view)? {
                    crate::extension::Flow::Continue => Ok(()),
                    crate::extension::Flow::Kill => {
                        self.kill();
                        Ok(())
                    }
                }
            }
            None => Err(Fault::UnknownInstruction(name.to_string())),
        }
    }

    // ---- misc tier-1 helpers ------------------------------------------

    fn move_reg(&mut self, src: &Source, dst: Register) -> Result<(), Fault> {
        let ty = self.get_move_type(src)?;
        self.set_reg(dst, ty)?;
        if let Some(s) = src.reg() {
            if s != dst {
                self.alias(s, dst);
            }
        }
        Ok(())
    }
}
