//! Verifier diagnostics.
//!
//! Faults are thrown as values out of the transfer functions and
//! decorated at the per-instruction boundary with the function name,
//! the offending instruction and its offset. Verification never stops
//! at the first bad function; one diagnostic is recorded per function
//! and the module failure carries them all.

use beam_asm::{Atom, Instruction, Label, Mfa, Operand, Register};
use thiserror::Error;

use crate::types::{FloatState, Type};

/// A condition that makes an instruction unsafe to execute.
#[derive(Debug, Clone, PartialEq, Error, strum::EnumDiscriminants)]
#[strum_discriminants(
    name(FaultKind),
    derive(strum::EnumIter, strum::Display, Hash),
    strum(serialize_all = "snake_case")
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Fault {
    /// A register was read before anything was stored in it.
    #[error("{0} is used but has not been initialized")]
    UninitializedReg(Operand),
    /// An operand cannot act as a data source.
    #[error("{0} is not a valid source operand")]
    BadSource(Operand),
    /// The value found cannot possibly have the type the instruction
    /// needs.
    #[error("needed {needed}, but found {actual}")]
    BadType {
        /// Type required by the instruction.
        needed: Type,
        /// Type actually found.
        actual: Type,
    },
    /// The destination cannot be stored to.
    #[error("invalid store to {0}")]
    InvalidStore(Operand),
    /// The slot holds a catch tag, which is not a term.
    #[error("{0} holds a catch tag")]
    Catchtag(Register),
    /// The slot holds a try tag, which is not a term.
    #[error("{0} holds a try tag")]
    Trytag(Register),
    /// The register holds a tuple still being filled in.
    #[error("register holds a tuple under construction")]
    TupleInProgress,
    /// A match context appeared where a plain term was needed.
    #[error("{0} holds a match context")]
    MatchContext(Operand),
    /// A binary-match instruction ran without a match context.
    #[error("{0} does not hold a match context")]
    NoBsmContext(Operand),
    /// A save slot index is out of range for its context.
    #[error("save slot {0} is out of range")]
    IllegalSave(u32),
    /// A restore names a slot that was never saved.
    #[error("restore of slot {0}, which has not been saved")]
    IllegalRestore(u32),
    /// A tail call passed a match context to a function that does not
    /// start a binary match.
    #[error("callee at label {0} does not begin a binary match")]
    NoBsStartMatch2(Label),
    /// The callee starts a binary match, but not on the register the
    /// context was passed in.
    #[error("callee at label {0} begins an incompatible binary match")]
    UnsuitableBsStartMatch2(Label),
    /// More than one live register holds a match context at a tail
    /// call.
    #[error("more than one register holds a match context: {0:?}")]
    MultipleMatchContexts(Vec<Register>),
    /// A frame was allocated while one of the given size existed.
    #[error("a stack frame of size {0} already exists")]
    ExistingStackFrame(u32),
    /// The instruction requires no stack frame, but one of the given
    /// size exists.
    #[error("a stack frame of size {0} is still allocated")]
    Allocated(u32),
    /// A deallocation size does not match the current frame.
    #[error("deallocation of {0} slots does not match the stack frame")]
    StackFrame(u32),
    /// A trim does not add up against the current frame.
    #[error("trim of {n} slots does not fit a frame of size {frame}")]
    Trim {
        /// Slots the instruction removes.
        n: u32,
        /// Frame size actually present.
        frame: u32,
    },
    /// A builder needs more heap than was reserved.
    #[error("needed {needed} heap words, but only {left} are reserved")]
    HeapOverflow {
        /// Words the builder needs.
        needed: u32,
        /// Words still reserved.
        left: u32,
    },
    /// A float instruction ran in the wrong error state.
    #[error("bad floating point state {0}")]
    BadFloatingPointState(FloatState),
    /// The instruction is not allowed inside a floating point block.
    #[error("instruction not allowed inside a floating point block")]
    UnsafeInstruction,
    /// `set_tuple_element` outside its one legal position.
    #[error("set_tuple_element is only legal directly after setelement/3")]
    IllegalContextForSetTupleElement,
    /// The catch/try nesting could not be tracked across a join.
    #[error("catch/try handler state is unknown at this point")]
    UnknownCatchTryState,
    /// The innermost handler has more than one possible failure label.
    #[error("catch/try handler state is ambiguous at this point")]
    AmbiguousCatchTryState,
    /// The frame size could not be tracked across a join.
    #[error("stack frame size is unknown at this point")]
    UnknownSizeOfStackframe,
    /// The function leaves while handlers are still open.
    #[error("{0} catch/try handler(s) still open")]
    UnfinishedCatchTry(usize),
    /// A new handler tag was placed above an enclosing one.
    #[error("handler tag in {0} breaks the required nesting order")]
    BadTryCatchNesting(Register),
    /// The live-register count is out of range.
    #[error("{0} is not a valid number of live registers")]
    BadNumberOfLiveRegs(u32),
    /// A register declared live is not initialized.
    #[error("{0} is declared live but not initialized")]
    NotLive(Register),
    /// The declared entry label is missing from the header.
    #[error("entry label {0} is missing")]
    NoEntryLabel(Label),
    /// The instruction operands have an impossible shape.
    #[error("malformed instruction")]
    IllegalInstruction,
    /// An opcode outside the catalogue with no registered handler.
    #[error("unknown instruction '{0}'")]
    UnknownInstruction(Atom),
    /// A `put` with no open tuple build, or a build left unfinished.
    #[error("instruction is incompatible with the open tuple build")]
    NotBuildingATuple,
    /// A `select_val` list is malformed or mixes selector types.
    #[error("malformed select list")]
    BadSelectList,
    /// A `select_tuple_arity` list holds a non-arity entry.
    #[error("malformed tuple arity list")]
    BadTupleArityList,
    /// A map operation repeats a key.
    #[error("map keys are not unique")]
    KeysNotUnique,
    /// A map field list is empty.
    #[error("empty field list")]
    EmptyFieldList,
    /// An unrooted message was stored in a stack slot.
    #[error("fragile message reference stored in {0}")]
    FragileMessageReference(Register),
    /// An implementation limit of the emulator was exceeded.
    #[error("implementation limit exceeded")]
    Limit,
}

/// What went wrong in one function.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Cause {
    /// A fault at a specific instruction.
    Instruction {
        /// The offending instruction.
        instruction: Instruction,
        /// Its offset within the function body.
        offset: usize,
        /// The fault itself.
        fault: Fault,
    },
    /// Labels that are branched to but never defined.
    UndefLabels(Vec<Label>),
}

/// A per-function diagnostic.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostic {
    /// The function the fault was found in.
    pub mfa: Mfa,
    /// What went wrong.
    pub cause: Cause,
}

impl Diagnostic {
    /// The fault, when the cause is an instruction-level one.
    pub fn fault(&self) -> Option<&Fault> {
        match &self.cause {
            Cause::Instruction { fault, .. } => Some(fault),
            Cause::UndefLabels(_) => None,
        }
    }
}

/// Module verification failure: every function that failed, in
/// definition order.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("module {module} failed verification with {} diagnostic(s)", diagnostics.len())]
pub struct ValidateError {
    /// Name of the rejected module.
    pub module: Atom,
    /// One entry per rejected function.
    pub diagnostics: Vec<Diagnostic>,
}
