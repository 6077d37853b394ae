//! Verifier options and the opcode extension interface.
//!
//! Hosts that target a newer emulator can teach the verifier new
//! opcodes without forking it: a handler claims an opcode name and
//! validates its operands through a narrow view of the abstract
//! state.

use beam_asm::{Label, Operand, Register, Source};

use crate::error::Fault;
use crate::types::Type;
use crate::validator::Validator;

/// What happens to the instruction stream after a handled opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Execution falls through to the next instruction.
    Continue,
    /// The opcode unconditionally leaves the function.
    Kill,
}

/// A validation rule for one opcode outside the built-in catalogue.
pub trait OpcodeHandler {
    /// The opcode name this handler claims.
    fn name(&self) -> &str;

    /// Checks the operands against the current abstract state and
    /// applies the opcode's effects to it.
    fn validate(&self, args: &[Operand], view: &mut StateView<'_, '_>) -> Result<Flow, Fault>;
}

/// The slice of the abstract state an extension may touch.
pub struct StateView<'v, 'a> {
    v: &'v mut Validator<'a>,
}

impl<'v, 'a> StateView<'v, 'a> {
    pub(crate) fn new(v: &'v mut Validator<'a>) -> Self {
        StateView { v }
    }

    /// The type currently known for a source operand.
    pub fn source_type(&self, src: &Source) -> Result<Type, Fault> {
        self.v.get_type(src)
    }

    /// Checks that a source holds a readable term.
    pub fn assert_term(&self, src: &Source) -> Result<(), Fault> {
        self.v.assert_term(src)
    }

    /// Checks that a source could have the needed type.
    pub fn assert_type(&self, needed: &Type, src: &Source) -> Result<(), Fault> {
        self.v.assert_type(needed, src)
    }

    /// Writes a register, with the usual store checks.
    pub fn set_register(&mut self, dst: Register, ty: Type) -> Result<(), Fault> {
        self.v.set_reg(dst, ty)
    }

    /// Merges the current state into a branch target.
    pub fn branch_to(&mut self, l: Label) -> Result<(), Fault> {
        self.v.branch(l)
    }
}

/// Verifier configuration.
#[derive(Default)]
pub struct Options {
    handlers: Vec<Box<dyn OpcodeHandler>>,
}

impl Options {
    /// Options with no extensions registered.
    pub fn new() -> Self {
        Options::default()
    }

    /// Registers an opcode handler. Later registrations win on name
    /// clashes.
    pub fn with_handler(mut self, handler: Box<dyn OpcodeHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub(crate) fn handler_for(&self, name: &str) -> Option<&dyn OpcodeHandler> {
        self.handlers
            .iter()
            .rev()
            .find(|h| h.name() == name)
            .map(|b| b.as_ref())
    }
}
