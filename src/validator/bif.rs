//! Guard BIF handling and the static BIF type table.
//!
//! Argument types are deliberately not preconditions: a BIF applied
//! to the wrong kind of term raises an ordinary run-time exception,
//! which is not the verifier's business. What the verifier does use
//! is the converse: on the fall-through path the BIF has succeeded,
//! so its arguments are narrowed to the types it accepts.

use beam_asm::{Label, Operand, Register, Source};

use super::flow::test_result_type;
use super::Validator;
use crate::error::Fault;
use crate::state::Def;
use crate::types::{Arity, Type};

/// Whether a BIF form works on the float register bank and therefore
/// belongs to the floating point tier.
pub(super) fn touches_floats(args: &[Operand], dst: &Operand) -> bool {
    args.iter().any(|a| matches!(a, Operand::Fr(_))) || matches!(dst, Operand::Fr(_))
}

/// Result type of a guard BIF.
fn bif_result_type(op: &str, args: &[Source]) -> Type {
    match op {
        "tuple_size" | "length" | "size" | "byte_size" | "bit_size" | "map_size" | "trunc"
        | "round" | "div" | "rem" | "band" | "bor" | "bxor" | "bsl" | "bsr" | "bnot" => {
            Type::Integer(None)
        }
        "float" | "/" => Type::Float(None),
        "+" | "-" | "*" | "abs" => Type::Number,
        "not" | "and" | "or" | "xor" | "<" | ">" | ">=" | "=<" | "==" | "/=" | "=:=" | "=/=" => {
            Type::Bool
        }
        "node" => Type::Atom(None),
        "setelement" => Type::Tuple(Arity::AtLeast(if args.is_empty() { 0 } else { 1 })),
        op => test_result_type(op).map_or(Type::Term, |_| Type::Bool),
    }
}

/// The refinement record a BIF leaves behind for `is_eq_exact` and
/// `select_val`, when its result pins down its argument.
fn bif_def(op: &str, args: &[Source]) -> Option<Def> {
    let arg = args.first()?.reg()?;
    match op {
        "tuple_size" => Some(Def::TupleSize { tuple: arg }),
        op if test_result_type(op).is_some() => Some(Def::TypeTest {
            op: op.to_string(),
            arg,
        }),
        _ => None,
    }
}

/// What a successful call says about each argument.
fn argument_types(op: &str, args: &[Source]) -> Vec<(usize, Type)> {
    match (op, args.len()) {
        ("map_size", 1) => vec![(0, Type::Map)],
        ("map_get", 2) | ("is_map_key", 2) => vec![(1, Type::Map)],
        ("tuple_size", 1) => vec![(0, Type::Tuple(Arity::AtLeast(0)))],
        ("element", 2) => {
            let n = match args.first() {
                Some(Source::Integer(i)) if *i >= 1 && *i <= u32::MAX as i64 => *i as u32,
                _ => 0,
            };
            vec![(1, Type::Tuple(Arity::AtLeast(n)))]
        }
        ("hd", 1) | ("tl", 1) => vec![(0, Type::Cons)],
        ("byte_size", 1) | ("bit_size", 1) => vec![(0, Type::Binary)],
        ("abs", 1) | ("float", 1) | ("trunc", 1) | ("round", 1) => vec![(0, Type::Number)],
        ("+", 2) | ("-", 2) | ("*", 2) | ("/", 2) => {
            vec![(0, Type::Number), (1, Type::Number)]
        }
        ("div", 2) | ("rem", 2) | ("band", 2) | ("bor", 2) | ("bxor", 2) | ("bsl", 2)
        | ("bsr", 2) => vec![(0, Type::Integer(None)), (1, Type::Integer(None))],
        ("bnot", 1) => vec![(0, Type::Integer(None))],
        _ => Vec::new(),
    }
}

impl Validator<'_> {
    fn refine_bif_args(&mut self, op: &str, args: &[Source]) {
        for (i, ty) in argument_types(op, args) {
            if let Some(r) = args[i].reg() {
                self.refine_reg_soft(r, &ty);
            }
        }
    }

    fn collect_sources(args: &[Operand]) -> Result<Vec<Source>, Fault> {
        args.iter()
            .map(|a| a.source().ok_or(Fault::IllegalInstruction))
            .collect()
    }

    /// A guard BIF with no failure label outside a float block.
    pub(super) fn pure_bif(
        &mut self,
        op: &str,
        args: &[Operand],
        dst: &Operand,
    ) -> Result<(), Fault> {
        let srcs = Self::collect_sources(args)?;
        for s in &srcs {
            self.assert_term(s)?;
        }
        let Some(dreg) = dst.register() else {
            return Err(Fault::InvalidStore(dst.clone()));
        };
        self.refine_bif_args(op, &srcs);
        let ty = bif_result_type(op, &srcs);
        match bif_def(op, &srcs) {
            Some(def) => self.set_reg_with_def(dreg, ty, def),
            None => self.set_reg(dreg, ty),
        }
    }

    /// A guard BIF with a failure label.
    pub(super) fn branching_bif(
        &mut self,
        op: &str,
        fail: Label,
        args: &[Operand],
        dst: &Operand,
    ) -> Result<(), Fault> {
        let srcs = Self::collect_sources(args)?;
        for s in &srcs {
            self.assert_term(s)?;
        }
        let Some(dreg) = dst.register() else {
            return Err(Fault::InvalidStore(dst.clone()));
        };
        self.branch(fail)?;
        self.refine_bif_args(op, &srcs);
        let ty = bif_result_type(op, &srcs);
        match bif_def(op, &srcs) {
            Some(def) => self.set_reg_with_def(dreg, ty, def),
            None => self.set_reg(dreg, ty),
        }
    }

    /// A BIF that may collect: the live window shrinks, the heap
    /// reservation dies, and everything on the stack must be
    /// walkable.
    pub(super) fn gc_bif(
        &mut self,
        op: &str,
        fail: Label,
        live: u32,
        args: &[Source],
        dst: Register,
    ) -> Result<(), Fault> {
        self.verify_live(live)?;
        self.verify_y_init()?;
        self.kill_heap();
        self.branch(fail)?;
        self.prune_x(live);
        for s in args {
            self.assert_term(s)?;
        }
        self.refine_bif_args(op, args);
        let ty = bif_result_type(op, args);
        match bif_def(op, args) {
            Some(def) => self.set_reg_with_def(dst, ty, def),
            None => self.set_reg(dst, ty),
        }
    }
}
