//! Map construction and probing.

use beam_asm::{Label, Operand, Register, Source};
use itertools::Itertools;

use super::Validator;
use crate::error::Fault;
use crate::types::Type;

fn check_unique(keys: &[&Operand]) -> Result<(), Fault> {
    for (i, k) in keys.iter().enumerate() {
        if keys[i + 1..].contains(k) {
            return Err(Fault::KeysNotUnique);
        }
    }
    Ok(())
}

impl Validator<'_> {
    pub(super) fn put_map(
        &mut self,
        fail: Label,
        src: &Source,
        dst: Register,
        live: u32,
        list: &[Operand],
    ) -> Result<(), Fault> {
        self.assert_type(&Type::Map, src)?;
        if list.len() % 2 != 0 {
            return Err(Fault::IllegalInstruction);
        }
        let mut keys = Vec::new();
        for (k, v) in list.iter().tuples() {
            let key = k.source().ok_or(Fault::IllegalInstruction)?;
            self.assert_term(&key)?;
            let value = v.source().ok_or(Fault::IllegalInstruction)?;
            self.assert_term(&value)?;
            keys.push(k);
        }
        check_unique(&keys)?;
        self.verify_live(live)?;
        self.verify_y_init()?;
        self.kill_heap();
        self.branch(fail)?;
        self.prune_x(live);
        self.set_reg(dst, Type::Map)
    }

    pub(super) fn get_map_elements(
        &mut self,
        fail: Label,
        src: &Source,
        list: &[Operand],
    ) -> Result<(), Fault> {
        self.assert_type(&Type::Map, src)?;
        if list.is_empty() {
            return Err(Fault::EmptyFieldList);
        }
        if list.len() % 2 != 0 {
            return Err(Fault::IllegalInstruction);
        }
        let mut keys = Vec::new();
        let mut dsts = Vec::new();
        for (k, d) in list.iter().tuples() {
            let key = k.source().ok_or(Fault::IllegalInstruction)?;
            self.assert_term(&key)?;
            dsts.push(d.register().ok_or(Fault::IllegalInstruction)?);
            keys.push(k);
        }
        check_unique(&keys)?;
        self.branch(fail)?;
        if let Some(r) = src.reg() {
            self.refine_reg_soft(r, &Type::Map);
        }
        for d in dsts {
            self.set_reg(d, Type::Term)?;
        }
        Ok(())
    }

    pub(super) fn has_map_fields(
        &mut self,
        fail: Label,
        src: &Source,
        keys: &[Operand],
    ) -> Result<(), Fault> {
        self.assert_type(&Type::Map, src)?;
        if keys.is_empty() {
            return Err(Fault::EmptyFieldList);
        }
        for k in keys {
            let key = k.source().ok_or(Fault::IllegalInstruction)?;
            self.assert_term(&key)?;
        }
        check_unique(&keys.iter().collect::<Vec<_>>())?;
        self.branch(fail)?;
        if let Some(r) = src.reg() {
            self.refine_reg_soft(r, &Type::Map);
        }
        Ok(())
    }
}
