//! Term building and projection.

use beam_asm::{Register, Source};

use super::Validator;
use crate::error::Fault;
use crate::state::PutsLeft;
use crate::types::{Arity, Type};

impl Validator<'_> {
    pub(super) fn put_list(
        &mut self,
        head: &Source,
        tail: &Source,
        dst: Register,
    ) -> Result<(), Fault> {
        self.consume_heap(2)?;
        self.assert_term(head)?;
        self.assert_term(tail)?;
        self.set_reg(dst, Type::Cons)
    }

    pub(super) fn put_tuple(&mut self, arity: u32, dst: Register) -> Result<(), Fault> {
        self.consume_heap(1)?;
        if arity == 0 {
            return self.set_reg(dst, Type::Tuple(Arity::Exact(0)));
        }
        self.set_reg(dst, Type::TupleInProgress)?;
        self.st_mut().puts_left = Some(PutsLeft {
            left: arity,
            dst,
            ty: Type::Tuple(Arity::Exact(arity)),
        });
        Ok(())
    }

    pub(super) fn put(&mut self, src: &Source) -> Result<(), Fault> {
        let Some(mut puts) = self.st_mut().puts_left.take() else {
            return Err(Fault::NotBuildingATuple);
        };
        self.consume_heap(1)?;
        self.assert_term(src)?;
        puts.left -= 1;
        if puts.left == 0 {
            self.set_reg(puts.dst, puts.ty)
        } else {
            self.st_mut().puts_left = Some(puts);
            Ok(())
        }
    }

    pub(super) fn put_tuple2(&mut self, dst: Register, elements: &[Source]) -> Result<(), Fault> {
        let arity = elements.len() as u32;
        self.consume_heap(arity + 1)?;
        for e in elements {
            self.assert_term(e)?;
        }
        self.set_reg(dst, Type::Tuple(Arity::Exact(arity)))
    }

    pub(super) fn get_list(&mut self, src: &Source, hd: Register, tl: Register) -> Result<(), Fault> {
        let ty = self.get_type(src)?;
        self.assert_type(&Type::Cons, src)?;
        let out = if ty.is_fragile() {
            Type::Term.fragile()
        } else {
            Type::Term
        };
        self.set_reg(hd, out.clone())?;
        self.set_reg(tl, out)
    }

    pub(super) fn get_tuple_element(
        &mut self,
        src: &Source,
        index: u32,
        dst: Register,
    ) -> Result<(), Fault> {
        let need = index.checked_add(1).ok_or(Fault::IllegalInstruction)?;
        let ty = self.get_type(src)?;
        self.refine_source(src, &Type::Tuple(Arity::AtLeast(need)))?;
        let out = if ty.is_fragile() {
            Type::Term.fragile()
        } else {
            Type::Term
        };
        self.set_reg(dst, out)
    }

    pub(super) fn set_tuple_element(
        &mut self,
        src: &Source,
        tuple: &Source,
        index: u32,
    ) -> Result<(), Fault> {
        if !self.setelem_ok {
            return Err(Fault::IllegalContextForSetTupleElement);
        }
        let need = index.checked_add(1).ok_or(Fault::IllegalInstruction)?;
        self.assert_term(src)?;
        self.assert_type(&Type::Tuple(Arity::AtLeast(need)), tuple)
    }
}
