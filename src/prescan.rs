//! Cross-function index of binary-match entry points.
//!
//! Built once before any function is verified and immutable after;
//! tail calls that pass a match context consult it to prove that the
//! callee resumes the context in place.

use std::collections::BTreeMap;

use beam_asm::{Function, Instruction, Label, Operand, Register};

/// How a function entry consumes a match context.
#[derive(Debug, Clone, PartialEq)]
pub struct BsmEntry {
    /// The context operand of the opening `bs_start_match2`.
    pub src: Operand,
    /// Its destination register.
    pub dst: Register,
}

/// Entry label to match-start mapping for a whole module.
#[derive(Debug, Default)]
pub struct EntryIndex {
    entries: BTreeMap<Label, BsmEntry>,
}

impl EntryIndex {
    /// Indexes every function of a module.
    pub fn build(functions: &[Function]) -> EntryIndex {
        let mut entries = BTreeMap::new();
        for f in functions {
            if let Some(e) = index_function(f) {
                entries.insert(f.entry(), e);
            }
        }
        EntryIndex { entries }
    }

    /// The recorded match start for an entry label, if any.
    pub fn get(&self, entry: Label) -> Option<&BsmEntry> {
        self.entries.get(&entry)
    }
}

fn index_function(f: &Function) -> Option<BsmEntry> {
    let code = f.code();
    let labels: BTreeMap<Label, usize> = code
        .iter()
        .enumerate()
        .filter_map(|(i, ins)| ins.defines_label().map(|l| (l, i)))
        .collect();

    let mut pos = labels.get(&f.entry())? + 1;
    let mut followed_skip = false;
    loop {
        while matches!(
            code.get(pos),
            Some(Instruction::Label(_) | Instruction::Line(_) | Instruction::Comment(_))
        ) {
            pos += 1;
        }
        match code.get(pos) {
            Some(Instruction::BsStartMatch2 { src, dst, .. }) => {
                return Some(BsmEntry {
                    src: src.clone(),
                    dst: *dst,
                })
            }
            // A historical code generator emitted a failing test plus
            // a context conversion before the real match start; this
            // one shape is tolerated, once, and nothing else.
            // TODO: drop this once no supported compiler emits it.
            Some(test) if !followed_skip => {
                let fail = test_fail_label(test)?;
                match code.get(pos + 1) {
                    Some(Instruction::BsContextToBinary(_)) => {
                        followed_skip = true;
                        pos = labels.get(&fail)? + 1;
                    }
                    _ => return None,
                }
            }
            _ => return None,
        }
    }
}

fn test_fail_label(i: &Instruction) -> Option<Label> {
    use Instruction::*;
    match i {
        IsFloat { fail, .. }
        | IsTuple { fail, .. }
        | IsNonemptyList { fail, .. }
        | IsMap { fail, .. }
        | TestArity { fail, .. }
        | IsTaggedTuple { fail, .. }
        | IsEqExact { fail, .. }
        | HasMapFields { fail, .. }
        | Test { fail, .. }
        | BsTestTail2 { fail, .. }
        | BsTestUnit { fail, .. }
        | BsMatchString { fail, .. }
        | BsSkipBits2 { fail, .. } => Some(*fail),
        _ => None,
    }
}
