//! Control transfer out of the straight line: calls, returns,
//! selects and the two-way type tests.

use beam_asm::{ExtFunc, Label, Operand, Register, Source};

use super::Validator;
use crate::error::Fault;
use crate::state::{Def, FrameSize};
use crate::types::{meet, Arity, Type};

/// Success type of a type-test BIF, for refinement of the tested
/// register on the true branch.
pub(super) fn test_result_type(op: &str) -> Option<Type> {
    Some(match op {
        "is_map" => Type::Map,
        "is_tuple" => Type::Tuple(Arity::AtLeast(0)),
        "is_binary" | "is_bitstring" => Type::Binary,
        "is_integer" => Type::Integer(None),
        "is_float" => Type::Float(None),
        "is_number" => Type::Number,
        "is_atom" => Type::Atom(None),
        "is_boolean" => Type::Bool,
        _ => return None,
    })
}

impl Validator<'_> {
    pub(super) fn ret(&mut self) -> Result<(), Fault> {
        self.assert_term(&Source::X(0))?;
        match self.st().ct.depth() {
            Some(0) => {}
            Some(d) => return Err(Fault::UnfinishedCatchTry(d)),
            None => return Err(Fault::UnknownCatchTryState),
        }
        match self.st().numy {
            FrameSize::None => {}
            FrameSize::Undecided => return Err(Fault::UnknownSizeOfStackframe),
            FrameSize::Size(sz) => return Err(Fault::Allocated(sz)),
        }
        self.kill();
        Ok(())
    }

    // ---- body calls ---------------------------------------------------

    pub(super) fn call_local(&mut self, arity: usize, _label: Label) -> Result<(), Fault> {
        self.verify_live(arity as u32)?;
        self.verify_y_init()?;
        self.finish_body_call(Type::Term)
    }

    pub(super) fn call_ext(&mut self, arity: usize, func: &ExtFunc) -> Result<(), Fault> {
        if func.arity != arity {
            return Err(Fault::IllegalInstruction);
        }
        self.verify_live(arity as u32)?;
        self.verify_y_init()?;
        let is_setelement = func.module == "erlang" && func.function == "setelement" && arity == 3;
        self.finish_body_call(ext_return_type(func))?;
        if is_setelement {
            // The next instruction may destructively update the
            // fresh tuple now in x0.
            if self.vst.current.is_some() {
                self.st_mut().setelem = true;
            }
        }
        Ok(())
    }

    pub(super) fn call_fun(&mut self, arity: usize) -> Result<(), Fault> {
        self.verify_live(arity as u32 + 1)?;
        self.verify_y_init()?;
        self.assert_term(&Source::X(arity as u16))?;
        self.finish_body_call(Type::Term)
    }

    pub(super) fn apply(&mut self, arity: usize, dealloc: Option<u32>) -> Result<(), Fault> {
        let live = arity as u32 + 2;
        match dealloc {
            None => {
                self.verify_live(live)?;
                self.verify_y_init()?;
                self.finish_body_call(Type::Term)
            }
            Some(n) => self.tail_call(live as usize, None, Some(n)),
        }
    }

    fn finish_body_call(&mut self, ret: Type) -> Result<(), Fault> {
        self.kill_heap();
        self.prune_x(0);
        if ret == Type::Exception {
            self.kill();
            return Ok(());
        }
        self.st_mut().x.set(0, ret);
        Ok(())
    }

    // ---- tail calls ---------------------------------------------------

    pub(super) fn tail_call_local(
        &mut self,
        arity: usize,
        label: Label,
        dealloc: Option<u32>,
    ) -> Result<(), Fault> {
        self.tail_call(arity, Some(label), dealloc)
    }

    pub(super) fn tail_call_ext(
        &mut self,
        arity: usize,
        func: &ExtFunc,
        dealloc: Option<u32>,
    ) -> Result<(), Fault> {
        if func.arity != arity {
            return Err(Fault::IllegalInstruction);
        }
        self.tail_call(arity, None, dealloc)
    }

    fn tail_call(
        &mut self,
        arity: usize,
        callee: Option<Label>,
        dealloc: Option<u32>,
    ) -> Result<(), Fault> {
        match self.st().ct.depth() {
            Some(0) => {}
            Some(d) => return Err(Fault::UnfinishedCatchTry(d)),
            None => return Err(Fault::UnknownCatchTryState),
        }
        self.verify_live(arity as u32)?;
        self.verify_match_contexts(arity, callee)?;
        match dealloc {
            Some(n) => {
                self.verify_y_init()?;
                self.deallocate(n)?;
            }
            None => match self.st().numy {
                FrameSize::None => {}
                FrameSize::Undecided => return Err(Fault::UnknownSizeOfStackframe),
                FrameSize::Size(sz) => return Err(Fault::Allocated(sz)),
            },
        }
        self.kill();
        Ok(())
    }

    /// At most one argument may carry a match context, the context
    /// must not be duplicated into the frame, and the callee must
    /// resume it in place.
    fn verify_match_contexts(&mut self, arity: usize, callee: Option<Label>) -> Result<(), Fault> {
        let mut ctxs: Vec<(Register, u64)> = Vec::new();
        for n in 0..arity.min(u16::MAX as usize) as u16 {
            if let Some(Type::MatchContext(m)) = self.st().x.get(n) {
                ctxs.push((Register::X(n), m.id));
            }
        }
        match ctxs.as_slice() {
            [] => Ok(()),
            [(reg, id)] => {
                for (n, t) in self.st().y.iter() {
                    if matches!(t, Type::MatchContext(m) if m.id == *id) {
                        return Err(Fault::MultipleMatchContexts(vec![*reg, Register::Y(n)]));
                    }
                }
                let Register::X(r) = *reg else {
                    return Err(Fault::IllegalInstruction);
                };
                match callee {
                    None => Err(Fault::NoBsStartMatch2(0)),
                    Some(l) => match self.ft.get(l) {
                        None => Err(Fault::NoBsStartMatch2(l)),
                        Some(entry) if entry.src == Operand::X(r) && entry.dst == Register::X(r) => {
                            Ok(())
                        }
                        Some(_) => Err(Fault::UnsuitableBsStartMatch2(l)),
                    },
                }
            }
            many => Err(Fault::MultipleMatchContexts(
                many.iter().map(|(r, _)| *r).collect(),
            )),
        }
    }

    // ---- selects ------------------------------------------------------

    pub(super) fn select_val(
        &mut self,
        src: &Source,
        fail: Label,
        list: &[(Operand, Label)],
    ) -> Result<(), Fault> {
        self.assert_term(src)?;
        let mut family = None;
        for (val, _) in list {
            let f = match val {
                Operand::Atom(_) => "atom",
                Operand::Integer(_) => "integer",
                Operand::Float(_) => "float",
                _ => return Err(Fault::BadSelectList),
            };
            if *family.get_or_insert(f) != f {
                return Err(Fault::BadSelectList);
            }
        }
        self.branch(fail)?;
        for (val, l) in list {
            let val_src = val.source().ok_or(Fault::BadSelectList)?;
            let needed = Type::of_immediate(&val_src).ok_or(Fault::BadSelectList)?;
            let truthy = matches!(val, Operand::Atom(a) if a == "true");
            self.branch_with(*l, |v| {
                v.refine_source(src, &needed)?;
                if truthy {
                    if let Some(r) = src.reg() {
                        v.refine_by_def(r);
                    }
                }
                Ok(())
            })?;
        }
        self.kill();
        Ok(())
    }

    pub(super) fn select_tuple_arity(
        &mut self,
        src: &Source,
        fail: Label,
        list: &[(Operand, Label)],
    ) -> Result<(), Fault> {
        self.assert_type(&Type::Tuple(Arity::AtLeast(0)), src)?;
        self.branch(fail)?;
        for (val, l) in list {
            let arity = match val {
                Operand::Integer(n) if *n >= 0 && *n <= u32::MAX as i64 => *n as u32,
                _ => return Err(Fault::BadTupleArityList),
            };
            self.branch_with(*l, |v| {
                v.refine_source(src, &Type::Tuple(Arity::Exact(arity)))
            })?;
        }
        self.kill();
        Ok(())
    }

    // ---- type tests ---------------------------------------------------

    pub(super) fn type_test(&mut self, fail: Label, src: &Source, ty: Type) -> Result<(), Fault> {
        self.assert_term(src)?;
        self.branch(fail)?;
        self.refine_source(src, &ty)
    }

    pub(super) fn is_eq_exact(&mut self, fail: Label, a: &Source, b: &Source) -> Result<(), Fault> {
        let ta = self.get_type(a)?;
        let tb = self.get_type(b)?;
        self.branch(fail)?;
        match meet(&ta, &tb) {
            // The two sides can never be equal; the success path is
            // unreachable.
            None => {
                self.kill();
                Ok(())
            }
            Some(common) => {
                self.refine_source(a, &common)?;
                self.refine_source(b, &common)?;
                self.eq_def_refinements(a, b);
                self.eq_def_refinements(b, a);
                Ok(())
            }
        }
    }

    /// Extra knowledge available when `subject == other` is known to
    /// hold and `subject` has a recorded defining instruction.
    fn eq_def_refinements(&mut self, subject: &Source, other: &Source) {
        let Some(r) = subject.reg() else { return };
        let Some(def) = self.st().defs.get(&r).cloned() else {
            return;
        };
        match (def, other) {
            // tuple_size(T) == N pins T's arity.
            (Def::TupleSize { tuple }, Source::Integer(n))
                if (0..=u32::MAX as i64).contains(n) =>
            {
                self.refine_reg_soft(tuple, &Type::Tuple(Arity::Exact(*n as u32)));
            }
            (Def::TypeTest { .. }, Source::Atom(atom)) if atom == "true" => {
                self.refine_by_def(r);
            }
            _ => {}
        }
    }

    pub(super) fn generic_test(&mut self, fail: Label, args: &[Operand]) -> Result<(), Fault> {
        for arg in args {
            if let Some(src) = arg.source() {
                self.assert_term(&src)?;
            }
        }
        self.branch(fail)
    }

    // ---- refinement plumbing ------------------------------------------

    /// Applies the recorded type test behind a boolean register known
    /// to be true.
    pub(super) fn refine_by_def(&mut self, r: Register) {
        let Some(Def::TypeTest { op, arg }) = self.st().defs.get(&r).cloned() else {
            return;
        };
        if let Some(ty) = test_result_type(&op) {
            self.refine_reg_soft(arg, &ty);
        }
    }

    /// Best-effort narrowing; an incompatible hint is dropped rather
    /// than reported, since the value merely failed to be pinned.
    pub(super) fn refine_reg_soft(&mut self, r: Register, needed: &Type) {
        let current = match r {
            Register::X(n) => self.st().x.get(n).cloned(),
            Register::Y(n) => self.st().y.get(n).cloned(),
        };
        if let Some(current) = current {
            if let Some(t) = meet(&current, needed) {
                self.write_type(r, t);
            }
        }
    }
}

fn ext_return_type(func: &ExtFunc) -> Type {
    match (func.module.as_str(), func.function.as_str(), func.arity) {
        ("erlang", "error", 1 | 2)
        | ("erlang", "exit", 1)
        | ("erlang", "throw", 1)
        | ("erlang", "raise", 3)
        | ("erlang", "nif_error", 1 | 2) => Type::Exception,
        _ => Type::Term,
    }
}
