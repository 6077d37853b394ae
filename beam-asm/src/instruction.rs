use core::fmt;

use crate::operand::{Label, Operand, Register, Source};
use crate::term::{Atom, Term};

/// A heap reservation request: either plain words or a split request
/// carrying separate word and float pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HeapNeed {
    /// Reserve this many heap words.
    Words(u32),
    /// Reserve words and boxed-float slots separately.
    Alloc {
        /// Plain heap words.
        words: u32,
        /// Boxed floats.
        floats: u32,
    },
}

impl HeapNeed {
    /// Plain heap words requested.
    pub const fn words(&self) -> u32 {
        match self {
            HeapNeed::Words(w) => *w,
            HeapNeed::Alloc { words, .. } => *words,
        }
    }

    /// Boxed-float slots requested.
    pub const fn floats(&self) -> u32 {
        match self {
            HeapNeed::Words(_) => 0,
            HeapNeed::Alloc { floats, .. } => *floats,
        }
    }
}

impl From<u32> for HeapNeed {
    fn from(w: u32) -> Self {
        HeapNeed::Words(w)
    }
}

/// An external function reference `module:function/arity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtFunc {
    /// Module name.
    pub module: Atom,
    /// Function name.
    pub function: Atom,
    /// Arity.
    pub arity: usize,
}

impl ExtFunc {
    /// Builds an external function reference.
    pub fn new(module: &str, function: &str, arity: usize) -> Self {
        ExtFunc {
            module: module.to_string(),
            function: function.to_string(),
            arity,
        }
    }
}

impl fmt::Display for ExtFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.module, self.function, self.arity)
    }
}

/// A match-context save point: either the implicit start position or a
/// numbered slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SavePoint {
    /// The position before the first match.
    Start,
    /// A numbered save slot.
    Slot(u32),
}

/// One instruction of a function body.
///
/// Operand fields are typed where the encoding fixes their shape and
/// kept as raw [`Operand`]s where the original encoding is a list, so
/// that malformed-but-representable inputs reach the verifier and are
/// diagnosed rather than being unrepresentable.
#[derive(Debug, Clone, PartialEq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Instruction {
    // Meta.
    /// Defines a label.
    Label(Label),
    /// The function entry stub; raises `function_clause` when executed.
    FuncInfo {
        /// Module name.
        module: Atom,
        /// Function name.
        function: Atom,
        /// Arity.
        arity: usize,
    },
    /// Source-line marker.
    Line(u32),
    /// Compiler annotation; carries no semantics.
    Comment(Term),

    // Abnormal exits.
    /// Raises a `badmatch` exception with the given term.
    Badmatch(Source),
    /// Raises a `case_clause` exception with the given term.
    CaseEnd(Source),
    /// Raises a `try_clause` exception with the given term.
    TryCaseEnd(Source),
    /// Raises an `if_clause` exception.
    IfEnd,

    // Moves and projections.
    /// Copies a source into a register.
    Move {
        /// Value to copy.
        src: Source,
        /// Destination register.
        dst: Register,
    },
    /// Splits a cons cell into head and tail.
    GetList {
        /// The cons cell.
        src: Source,
        /// Head destination.
        hd: Register,
        /// Tail destination.
        tl: Register,
    },
    /// Reads a tuple element by zero-based index.
    GetTupleElement {
        /// The tuple.
        src: Source,
        /// Zero-based element index.
        index: u32,
        /// Destination register.
        dst: Register,
    },
    /// Clears a stack slot to a harmless value.
    Init(Register),
    /// Marks a stack slot as dead.
    Kill(Register),

    // Stack frame and heap reservation.
    /// Reserves a stack frame; slots start uninitialized.
    Allocate {
        /// X registers live across the allocation.
        live: u32,
        /// Frame size in slots.
        stack: u32,
    },
    /// Reserves a stack frame with all slots cleared.
    AllocateZero {
        /// X registers live across the allocation.
        live: u32,
        /// Frame size in slots.
        stack: u32,
    },
    /// Reserves a stack frame and heap words in one step.
    AllocateHeap {
        /// X registers live across the allocation.
        live: u32,
        /// Heap reservation.
        heap: HeapNeed,
        /// Frame size in slots.
        stack: u32,
    },
    /// [`Instruction::AllocateHeap`] with cleared slots.
    AllocateHeapZero {
        /// X registers live across the allocation.
        live: u32,
        /// Heap reservation.
        heap: HeapNeed,
        /// Frame size in slots.
        stack: u32,
    },
    /// Ensures heap room, garbage collecting if needed.
    TestHeap {
        /// Heap reservation.
        heap: HeapNeed,
        /// X registers live across a collection.
        live: u32,
    },
    /// Drops the current stack frame; the operand must match its size.
    Deallocate(u32),
    /// Removes the first `n` slots of the frame, keeping `remaining`.
    Trim {
        /// Slots removed from the bottom of the frame.
        n: u32,
        /// Slots left after the trim.
        remaining: u32,
    },

    // Term building.
    /// Builds a cons cell.
    PutList {
        /// Head value.
        head: Source,
        /// Tail value.
        tail: Source,
        /// Destination register.
        dst: Register,
    },
    /// Opens a tuple build; exactly `arity` `put` instructions follow.
    PutTuple {
        /// Number of elements.
        arity: u32,
        /// Destination register.
        dst: Register,
    },
    /// Fills the next element of an open tuple build.
    Put(Source),
    /// Builds a tuple from an inline element list.
    PutTuple2 {
        /// Destination register.
        dst: Register,
        /// Tuple elements in order.
        elements: Vec<Source>,
    },
    /// Destructively writes a tuple element; only legal immediately
    /// after a `setelement/3` call.
    SetTupleElement {
        /// Value to store.
        src: Source,
        /// The tuple being updated.
        tuple: Source,
        /// Zero-based element index.
        index: u32,
    },

    // Exception handlers.
    /// Installs a catch tag and opens a handler scope.
    Catch {
        /// Stack slot receiving the tag.
        dst: Register,
        /// Handler label.
        fail: Label,
    },
    /// Installs a try tag and opens a handler scope.
    Try {
        /// Stack slot receiving the tag.
        dst: Register,
        /// Handler label.
        fail: Label,
    },
    /// Disposes a catch tag.
    CatchEnd(Register),
    /// Disposes a try tag after a normal body exit.
    TryEnd(Register),
    /// Disposes a try tag at the start of handler code.
    TryCase(Register),

    // Receive.
    /// Marks the earliest message a following receive may need.
    RecvMark(Label),
    /// Commits a previously placed receive mark.
    RecvSet(Label),
    /// Sends `x1` to the process in `x0`.
    Send,
    /// Peeks the next message, branching when the queue is empty.
    LoopRec {
        /// Taken when no message is waiting.
        fail: Label,
        /// Receives the (still unrooted) message.
        dst: Register,
    },
    /// Advances the receive loop to the next message.
    LoopRecEnd(Label),
    /// Suspends until a message arrives.
    Wait(Label),
    /// Suspends with a timeout.
    WaitTimeout {
        /// Receive-loop label.
        fail: Label,
        /// Timeout value.
        src: Source,
    },
    /// Runs after a receive timeout fires.
    Timeout,
    /// Removes the current message from the queue, rooting it.
    RemoveMessage,

    // Control flow.
    /// Unconditional jump.
    Jump(Label),
    /// Returns to the caller with the result in `x0`.
    Return,
    /// Local call.
    Call {
        /// Argument count.
        arity: usize,
        /// Callee entry label.
        label: Label,
    },
    /// Local tail call that also drops the stack frame.
    CallLast {
        /// Argument count.
        arity: usize,
        /// Callee entry label.
        label: Label,
        /// Frame size to drop; must match the current frame.
        dealloc: u32,
    },
    /// Local tail call without a stack frame.
    CallOnly {
        /// Argument count.
        arity: usize,
        /// Callee entry label.
        label: Label,
    },
    /// External call.
    CallExt {
        /// Argument count.
        arity: usize,
        /// Callee.
        func: ExtFunc,
    },
    /// External tail call that also drops the stack frame.
    CallExtLast {
        /// Argument count.
        arity: usize,
        /// Callee.
        func: ExtFunc,
        /// Frame size to drop; must match the current frame.
        dealloc: u32,
    },
    /// External tail call without a stack frame.
    CallExtOnly {
        /// Argument count.
        arity: usize,
        /// Callee.
        func: ExtFunc,
    },
    /// Calls the fun in `x[arity]`.
    CallFun {
        /// Argument count, excluding the fun itself.
        arity: usize,
    },
    /// `apply/3` with module and function in `x[arity]`, `x[arity+1]`.
    Apply {
        /// Argument count, excluding module and function.
        arity: usize,
    },
    /// Tail-call `apply/3` that also drops the stack frame.
    ApplyLast {
        /// Argument count, excluding module and function.
        arity: usize,
        /// Frame size to drop; must match the current frame.
        dealloc: u32,
    },
    /// Dispatches on an immediate value.
    SelectVal {
        /// Value being dispatched on.
        src: Source,
        /// Taken when no entry matches.
        fail: Label,
        /// Value/label pairs; all values must share one immediate type.
        list: Vec<(Operand, Label)>,
    },
    /// Dispatches on a tuple arity.
    SelectTupleArity {
        /// Tuple being dispatched on.
        src: Source,
        /// Taken when no entry matches.
        fail: Label,
        /// Arity/label pairs.
        list: Vec<(Operand, Label)>,
    },

    // BIFs.
    /// Calls a guard BIF. Float arithmetic arrives through this form
    /// with `fr` operands.
    Bif {
        /// BIF name.
        op: Atom,
        /// Failure label, 0 when the BIF cannot fail.
        fail: Label,
        /// Arguments.
        args: Vec<Operand>,
        /// Result destination.
        dst: Operand,
    },
    /// Calls a BIF that may trigger a garbage collection.
    GcBif {
        /// BIF name.
        op: Atom,
        /// Failure label, 0 to raise instead.
        fail: Label,
        /// X registers live across a collection.
        live: u32,
        /// Arguments.
        args: Vec<Source>,
        /// Result destination.
        dst: Register,
    },

    // Float error state.
    /// Opens a float block; clears the accumulated float error.
    Fclearerror,
    /// Closes a float block; checks the accumulated float error.
    Fcheckerror(Label),
    /// Converts a number into a float register.
    Fconv {
        /// Value to convert.
        src: Source,
        /// Destination float register.
        dst: u16,
    },
    /// Moves between float registers and term registers.
    Fmove {
        /// Source: a float register, a register, or a float literal.
        src: Operand,
        /// Destination: a float register or a register.
        dst: Operand,
    },

    // Binary matching.
    /// Opens a match context over a binary.
    BsStartMatch2 {
        /// Taken when the source is not a bitstring.
        fail: Label,
        /// X registers live across the operation.
        live: u32,
        /// The matched value, or an existing context being resumed.
        src: Operand,
        /// Number of save slots to reserve.
        slots: u32,
        /// Destination for the context.
        dst: Register,
    },
    /// Saves the current match position into a slot.
    BsSave2 {
        /// The match context.
        ctx: Source,
        /// Save point.
        slot: SavePoint,
    },
    /// Restores a previously saved match position.
    BsRestore2 {
        /// The match context.
        ctx: Source,
        /// Save point; must have been saved first.
        slot: SavePoint,
    },
    /// Converts a match context back into a binary in place.
    BsContextToBinary(Source),
    /// Matches a literal bit string.
    BsMatchString {
        /// Taken on mismatch.
        fail: Label,
        /// The match context.
        ctx: Source,
        /// Length in bits.
        bits: u64,
        /// The bytes to match.
        string: Vec<u8>,
    },
    /// Skips over a sized segment.
    BsSkipBits2 {
        /// Taken when too few bits remain.
        fail: Label,
        /// The match context.
        ctx: Source,
        /// Segment size.
        size: Source,
        /// Size multiplier.
        unit: u32,
        /// Field flags.
        flags: Operand,
    },
    /// Skips a UTF-8 character.
    BsSkipUtf8 {
        /// Taken on a malformed character.
        fail: Label,
        /// The match context.
        ctx: Source,
        /// X registers live across the operation.
        live: u32,
    },
    /// Skips a UTF-16 character.
    BsSkipUtf16 {
        /// Taken on a malformed character.
        fail: Label,
        /// The match context.
        ctx: Source,
        /// X registers live across the operation.
        live: u32,
    },
    /// Skips a UTF-32 character.
    BsSkipUtf32 {
        /// Taken on a malformed character.
        fail: Label,
        /// The match context.
        ctx: Source,
        /// X registers live across the operation.
        live: u32,
    },
    /// Succeeds when exactly `bits` bits remain.
    BsTestTail2 {
        /// Taken otherwise.
        fail: Label,
        /// The match context.
        ctx: Source,
        /// Expected remaining size in bits.
        bits: u64,
    },
    /// Succeeds when the remaining size is a multiple of `unit`.
    BsTestUnit {
        /// Taken otherwise.
        fail: Label,
        /// The match context.
        ctx: Source,
        /// Required unit.
        unit: u32,
    },
    /// Extracts an integer segment.
    BsGetInteger2 {
        /// Taken on mismatch.
        fail: Label,
        /// X registers live across the operation.
        live: u32,
        /// The match context.
        ctx: Source,
        /// Segment size.
        size: Source,
        /// Size multiplier.
        unit: u32,
        /// Field flags.
        flags: Operand,
        /// Destination register.
        dst: Register,
    },
    /// Extracts a float segment.
    BsGetFloat2 {
        /// Taken on mismatch.
        fail: Label,
        /// X registers live across the operation.
        live: u32,
        /// The match context.
        ctx: Source,
        /// Segment size.
        size: Source,
        /// Size multiplier.
        unit: u32,
        /// Field flags.
        flags: Operand,
        /// Destination register.
        dst: Register,
    },
    /// Extracts a binary segment.
    BsGetBinary2 {
        /// Taken on mismatch.
        fail: Label,
        /// X registers live across the operation.
        live: u32,
        /// The match context.
        ctx: Source,
        /// Segment size.
        size: Source,
        /// Size multiplier.
        unit: u32,
        /// Field flags.
        flags: Operand,
        /// Destination register.
        dst: Register,
    },
    /// Extracts a UTF-8 character as an integer.
    BsGetUtf8 {
        /// Taken on a malformed character.
        fail: Label,
        /// X registers live across the operation.
        live: u32,
        /// The match context.
        ctx: Source,
        /// Destination register.
        dst: Register,
    },
    /// Extracts a UTF-16 character as an integer.
    BsGetUtf16 {
        /// Taken on a malformed character.
        fail: Label,
        /// X registers live across the operation.
        live: u32,
        /// The match context.
        ctx: Source,
        /// Destination register.
        dst: Register,
    },
    /// Extracts a UTF-32 character as an integer.
    BsGetUtf32 {
        /// Taken on a malformed character.
        fail: Label,
        /// X registers live across the operation.
        live: u32,
        /// The match context.
        ctx: Source,
        /// Destination register.
        dst: Register,
    },

    // Binary construction.
    /// Starts building a binary of a byte-sized length.
    BsInit2 {
        /// Taken when the size is invalid.
        fail: Label,
        /// Size in bytes.
        size: Source,
        /// Heap words needed besides the binary itself.
        heap: u32,
        /// X registers live across the operation.
        live: u32,
        /// Field flags.
        flags: Operand,
        /// Destination register.
        dst: Register,
    },
    /// Starts building a binary of a bit-sized length.
    BsInitBits {
        /// Taken when the size is invalid.
        fail: Label,
        /// Size in bits.
        size: Source,
        /// Heap words needed besides the binary itself.
        heap: u32,
        /// X registers live across the operation.
        live: u32,
        /// Field flags.
        flags: Operand,
        /// Destination register.
        dst: Register,
    },
    /// Appends to an existing binary, sharing when possible.
    BsAppend {
        /// Taken when the size is invalid.
        fail: Label,
        /// Bits to append.
        size: Source,
        /// Heap words needed besides the binary itself.
        heap: u32,
        /// X registers live across the operation.
        live: u32,
        /// Size multiplier.
        unit: u32,
        /// Binary being extended.
        src: Source,
        /// Destination register.
        dst: Register,
    },
    /// Appends to a binary this process is known to own.
    BsPrivateAppend {
        /// Taken when the size is invalid.
        fail: Label,
        /// Bits to append.
        size: Source,
        /// Size multiplier.
        unit: u32,
        /// Binary being extended.
        src: Source,
        /// Destination register.
        dst: Register,
    },
    /// Writes an integer segment into the binary under construction.
    BsPutInteger {
        /// Taken when the value does not fit.
        fail: Label,
        /// Segment size.
        size: Source,
        /// Size multiplier.
        unit: u32,
        /// Field flags.
        flags: Operand,
        /// Value to write.
        src: Source,
    },
    /// Writes a float segment into the binary under construction.
    BsPutFloat {
        /// Taken when the value does not fit.
        fail: Label,
        /// Segment size.
        size: Source,
        /// Size multiplier.
        unit: u32,
        /// Field flags.
        flags: Operand,
        /// Value to write.
        src: Source,
    },
    /// Writes a binary segment into the binary under construction.
    BsPutBinary {
        /// Taken when the value does not fit.
        fail: Label,
        /// Segment size.
        size: Source,
        /// Size multiplier.
        unit: u32,
        /// Field flags.
        flags: Operand,
        /// Value to write.
        src: Source,
    },
    /// Writes a literal string segment.
    BsPutString {
        /// Length in bytes.
        len: u32,
        /// The bytes to write.
        string: Vec<u8>,
    },
    /// Writes a UTF-8 character.
    BsPutUtf8 {
        /// Taken on an invalid code point.
        fail: Label,
        /// The code point.
        src: Source,
    },
    /// Writes a UTF-16 character.
    BsPutUtf16 {
        /// Taken on an invalid code point.
        fail: Label,
        /// The code point.
        src: Source,
    },
    /// Writes a UTF-32 character.
    BsPutUtf32 {
        /// Taken on an invalid code point.
        fail: Label,
        /// The code point.
        src: Source,
    },
    /// Computes `a + b * unit` for binary sizes.
    BsAdd {
        /// Taken on overflow.
        fail: Label,
        /// First addend.
        a: Source,
        /// Second addend, scaled by `unit`.
        b: Source,
        /// Scale for the second addend.
        unit: u32,
        /// Destination register.
        dst: Register,
    },
    /// Size in bytes of a code point encoded as UTF-8.
    BsUtf8Size {
        /// Taken on an invalid code point.
        fail: Label,
        /// The code point.
        src: Source,
        /// Destination register.
        dst: Register,
    },
    /// Size in bytes of a code point encoded as UTF-16.
    BsUtf16Size {
        /// Taken on an invalid code point.
        fail: Label,
        /// The code point.
        src: Source,
        /// Destination register.
        dst: Register,
    },

    // Type tests.
    /// Branches unless the source is a float.
    IsFloat {
        /// Taken on mismatch.
        fail: Label,
        /// Tested value.
        src: Source,
    },
    /// Branches unless the source is a tuple.
    IsTuple {
        /// Taken on mismatch.
        fail: Label,
        /// Tested value.
        src: Source,
    },
    /// Branches unless the source is a cons cell.
    IsNonemptyList {
        /// Taken on mismatch.
        fail: Label,
        /// Tested value.
        src: Source,
    },
    /// Branches unless the source is a map.
    IsMap {
        /// Taken on mismatch.
        fail: Label,
        /// Tested value.
        src: Source,
    },
    /// Branches unless the tuple has the given arity.
    TestArity {
        /// Taken on mismatch.
        fail: Label,
        /// Tested tuple.
        src: Source,
        /// Required arity.
        arity: u32,
    },
    /// Branches unless the source is a tuple of the given arity whose
    /// first element is the given atom.
    IsTaggedTuple {
        /// Taken on mismatch.
        fail: Label,
        /// Tested value.
        src: Source,
        /// Required arity.
        arity: u32,
        /// Required first element.
        atom: Term,
    },
    /// Branches unless the operands are exactly equal.
    IsEqExact {
        /// Taken on mismatch.
        fail: Label,
        /// Left operand.
        a: Source,
        /// Right operand.
        b: Source,
    },
    /// Branches unless the map has all the given keys.
    HasMapFields {
        /// Taken on mismatch.
        fail: Label,
        /// Tested map.
        src: Source,
        /// Keys to probe; must be non-empty and unique.
        keys: Vec<Operand>,
    },
    /// Any other two-way type test.
    Test {
        /// Test name.
        op: Atom,
        /// Taken on mismatch.
        fail: Label,
        /// Test operands.
        args: Vec<Operand>,
    },

    // Maps.
    /// Builds a map from a source map plus key/value updates.
    PutMapAssoc {
        /// Taken when the source is not a map.
        fail: Label,
        /// Source map.
        src: Source,
        /// Destination register.
        dst: Register,
        /// X registers live across the operation.
        live: u32,
        /// Alternating keys and values.
        list: Vec<Operand>,
    },
    /// Like [`Instruction::PutMapAssoc`] but every key must exist.
    PutMapExact {
        /// Taken when a key is missing.
        fail: Label,
        /// Source map.
        src: Source,
        /// Destination register.
        dst: Register,
        /// X registers live across the operation.
        live: u32,
        /// Alternating keys and values.
        list: Vec<Operand>,
    },
    /// Fetches several map values at once.
    GetMapElements {
        /// Taken when a key is missing.
        fail: Label,
        /// Source map.
        src: Source,
        /// Alternating keys and destination registers.
        list: Vec<Operand>,
    },

    // Extension point.
    /// An opcode outside the built-in catalogue, resolved through the
    /// verifier's extension registry.
    Custom {
        /// Opcode name.
        name: Atom,
        /// Raw operands.
        args: Vec<Operand>,
    },
}

impl Instruction {
    /// The opcode name in assembly spelling.
    pub fn name(&self) -> &str {
        match self {
            Instruction::Custom { name, .. } => name,
            other => other.into(),
        }
    }

    /// The label this instruction defines, if any.
    pub const fn defines_label(&self) -> Option<Label> {
        match self {
            Instruction::Label(l) => Some(*l),
            _ => None,
        }
    }
}
