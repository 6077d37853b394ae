use beam_asm::{ExtFunc, Function, HeapNeed, Instruction, Module, Operand, Register, SavePoint, Source};
use beam_validate::types::FloatState;
use beam_validate::{validate, validate_with, Cause, Fault, Flow, OpcodeHandler, Options, StateView, ValidateError};

use Instruction as I;

fn func(name: &str, arity: usize, entry: u32, body: Vec<Instruction>) -> Function {
    let mut code = vec![
        I::Label(entry - 1),
        I::FuncInfo {
            module: "t".into(),
            function: name.into(),
            arity,
        },
        I::Label(entry),
    ];
    code.extend(body);
    Function::new(name, arity, entry, code)
}

fn module_of(functions: Vec<Function>) -> Module {
    Module::new("t", vec![], vec![], functions, 100)
}

fn check(arity: usize, body: Vec<Instruction>) -> Result<(), ValidateError> {
    validate(&module_of(vec![func("f", arity, 2, body)]))
}

fn expect_fault(arity: usize, body: Vec<Instruction>) -> Fault {
    let err = check(arity, body).expect_err("program must be rejected");
    match &err.diagnostics[0].cause {
        Cause::Instruction { fault, .. } => fault.clone(),
        other => panic!("unexpected cause: {other:?}"),
    }
}

// ---- the acceptance scenarios -----------------------------------------

#[test]
fn plain_return_is_accepted() {
    check(1, vec![I::Return]).unwrap();
}

#[test]
fn deallocate_must_match_the_frame() {
    let err = check(
        2,
        vec![
            I::Allocate { live: 2, stack: 1 },
            I::Move {
                src: Source::X(0),
                dst: Register::Y(0),
            },
            I::Deallocate(2),
            I::Return,
        ],
    )
    .expect_err("mismatched deallocate");
    match &err.diagnostics[0].cause {
        Cause::Instruction {
            instruction,
            offset,
            fault,
        } => {
            assert_eq!(*fault, Fault::StackFrame(2));
            assert_eq!(*instruction, I::Deallocate(2));
            assert_eq!(*offset, 5);
        }
        other => panic!("unexpected cause: {other:?}"),
    }
}

#[test]
fn unfinished_tuple_build_is_rejected_at_the_next_instruction() {
    let err = check(
        1,
        vec![
            I::TestHeap {
                heap: HeapNeed::Words(4),
                live: 1,
            },
            I::PutTuple {
                arity: 2,
                dst: Register::X(0),
            },
            I::Put(Source::Integer(1)),
            I::Return,
        ],
    )
    .expect_err("only one of two puts completed");
    match &err.diagnostics[0].cause {
        Cause::Instruction {
            instruction, fault, ..
        } => {
            assert_eq!(*fault, Fault::NotBuildingATuple);
            assert_eq!(*instruction, I::Return);
        }
        other => panic!("unexpected cause: {other:?}"),
    }
}

#[test]
fn handler_tags_must_nest_upwards() {
    let fault = expect_fault(
        1,
        vec![
            I::Allocate { live: 1, stack: 2 },
            I::Catch {
                dst: Register::Y(1),
                fail: 9,
            },
            I::Catch {
                dst: Register::Y(0),
                fail: 10,
            },
        ],
    );
    assert_eq!(fault, Fault::BadTryCatchNesting(Register::Y(0)));
}

#[test]
fn float_arithmetic_needs_a_cleared_error_state() {
    let fault = expect_fault(
        0,
        vec![I::Bif {
            op: "fadd".into(),
            fail: 0,
            args: vec![Operand::Fr(0), Operand::Fr(1)],
            dst: Operand::Fr(2),
        }],
    );
    assert_eq!(fault, Fault::BadFloatingPointState(FloatState::Undefined));
}

#[test]
fn a_message_must_not_reach_the_stack_before_remove_message() {
    let fault = expect_fault(
        0,
        vec![
            I::AllocateZero { live: 0, stack: 1 },
            I::LoopRec {
                fail: 3,
                dst: Register::X(0),
            },
            I::Move {
                src: Source::X(0),
                dst: Register::Y(0),
            },
            I::Label(3),
            I::Timeout,
            I::Deallocate(1),
            I::Return,
        ],
    );
    assert_eq!(fault, Fault::FragileMessageReference(Register::Y(0)));
}

// ---- registers and sources --------------------------------------------

#[test]
fn reading_an_unwritten_register_fails() {
    let fault = expect_fault(
        1,
        vec![I::Move {
            src: Source::X(1),
            dst: Register::X(0),
        }],
    );
    assert_eq!(fault, Fault::UninitializedReg(Operand::X(1)));
}

#[test]
fn register_indices_have_a_hard_limit() {
    let fault = expect_fault(
        1,
        vec![I::Move {
            src: Source::X(0),
            dst: Register::X(1023),
        }],
    );
    assert_eq!(fault, Fault::Limit);
}

#[test]
fn a_handler_tag_is_not_a_term() {
    let fault = expect_fault(
        1,
        vec![
            I::Allocate { live: 1, stack: 1 },
            I::Catch {
                dst: Register::Y(0),
                fail: 3,
            },
            I::Move {
                src: Source::Y(0),
                dst: Register::X(0),
            },
        ],
    );
    assert_eq!(fault, Fault::Catchtag(Register::Y(0)));
}

#[test]
fn stores_outside_the_frame_are_invalid() {
    let fault = expect_fault(
        1,
        vec![I::Move {
            src: Source::X(0),
            dst: Register::Y(0),
        }],
    );
    assert_eq!(fault, Fault::InvalidStore(Operand::Y(0)));
}

// ---- stack frames ------------------------------------------------------

#[test]
fn allocate_move_deallocate_roundtrip() {
    check(
        1,
        vec![
            I::Allocate { live: 1, stack: 2 },
            I::Move {
                src: Source::X(0),
                dst: Register::Y(0),
            },
            I::Move {
                src: Source::Nil,
                dst: Register::Y(1),
            },
            I::Move {
                src: Source::Y(0),
                dst: Register::X(0),
            },
            I::Deallocate(2),
            I::Return,
        ],
    )
    .unwrap();
}

#[test]
fn a_second_allocate_is_rejected() {
    let fault = expect_fault(
        1,
        vec![
            I::Allocate { live: 1, stack: 1 },
            I::Allocate { live: 1, stack: 1 },
        ],
    );
    assert_eq!(fault, Fault::ExistingStackFrame(1));
}

#[test]
fn returning_with_a_live_frame_is_rejected() {
    let fault = expect_fault(1, vec![I::Allocate { live: 1, stack: 1 }, I::Return]);
    assert_eq!(fault, Fault::Allocated(1));
}

#[test]
fn trim_shrinks_the_frame_from_the_bottom() {
    check(
        1,
        vec![
            I::AllocateZero { live: 1, stack: 3 },
            I::Move {
                src: Source::X(0),
                dst: Register::Y(2),
            },
            I::Trim { n: 1, remaining: 2 },
            I::Move {
                src: Source::Y(1),
                dst: Register::X(0),
            },
            I::Deallocate(2),
            I::Return,
        ],
    )
    .unwrap();
}

#[test]
fn trim_must_add_up() {
    let fault = expect_fault(
        1,
        vec![
            I::AllocateZero { live: 1, stack: 3 },
            I::Trim { n: 1, remaining: 3 },
        ],
    );
    assert_eq!(fault, Fault::Trim { n: 1, frame: 3 });
}

// ---- heap reservation --------------------------------------------------

#[test]
fn builders_consume_the_reservation() {
    check(
        1,
        vec![
            I::TestHeap {
                heap: HeapNeed::Words(4),
                live: 1,
            },
            I::PutList {
                head: Source::X(0),
                tail: Source::Nil,
                dst: Register::X(0),
            },
            I::PutList {
                head: Source::Integer(1),
                tail: Source::X(0),
                dst: Register::X(0),
            },
            I::Return,
        ],
    )
    .unwrap();
}

#[test]
fn building_past_the_reservation_is_rejected() {
    let fault = expect_fault(
        1,
        vec![
            I::TestHeap {
                heap: HeapNeed::Words(2),
                live: 1,
            },
            I::PutList {
                head: Source::X(0),
                tail: Source::Nil,
                dst: Register::X(0),
            },
            I::PutList {
                head: Source::Integer(1),
                tail: Source::X(0),
                dst: Register::X(0),
            },
        ],
    );
    assert_eq!(fault, Fault::HeapOverflow { needed: 2, left: 0 });
}

#[test]
fn a_call_kills_the_reservation() {
    let fault = expect_fault(
        1,
        vec![
            I::TestHeap {
                heap: HeapNeed::Words(2),
                live: 1,
            },
            I::CallExt {
                arity: 1,
                func: ExtFunc::new("lists", "reverse", 1),
            },
            I::PutList {
                head: Source::X(0),
                tail: Source::Nil,
                dst: Register::X(0),
            },
        ],
    );
    assert_eq!(fault, Fault::HeapOverflow { needed: 2, left: 0 });
}

// ---- tuples ------------------------------------------------------------

#[test]
fn complete_tuple_build_is_accepted() {
    check(
        1,
        vec![
            I::TestHeap {
                heap: HeapNeed::Words(3),
                live: 1,
            },
            I::PutTuple {
                arity: 2,
                dst: Register::X(0),
            },
            I::Put(Source::Integer(1)),
            I::Put(Source::Atom("a".into())),
            I::GetTupleElement {
                src: Source::X(0),
                index: 1,
                dst: Register::X(1),
            },
            I::Return,
        ],
    )
    .unwrap();
}

#[test]
fn put_without_an_open_build_is_rejected() {
    let fault = expect_fault(
        1,
        vec![
            I::TestHeap {
                heap: HeapNeed::Words(1),
                live: 1,
            },
            I::Put(Source::Integer(1)),
        ],
    );
    assert_eq!(fault, Fault::NotBuildingATuple);
}

#[test]
fn element_access_respects_the_known_arity() {
    let fault = expect_fault(
        1,
        vec![
            I::TestHeap {
                heap: HeapNeed::Words(3),
                live: 1,
            },
            I::PutTuple2 {
                dst: Register::X(0),
                elements: vec![Source::Integer(1), Source::Nil],
            },
            I::GetTupleElement {
                src: Source::X(0),
                index: 2,
                dst: Register::X(1),
            },
        ],
    );
    assert!(matches!(fault, Fault::BadType { .. }));
}

#[test]
fn set_tuple_element_only_follows_setelement() {
    check(
        3,
        vec![
            I::CallExt {
                arity: 3,
                func: ExtFunc::new("erlang", "setelement", 3),
            },
            I::Line(7),
            I::SetTupleElement {
                src: Source::Atom("a".into()),
                tuple: Source::X(0),
                index: 1,
            },
            I::Return,
        ],
    )
    .unwrap();

    let fault = expect_fault(
        1,
        vec![I::SetTupleElement {
            src: Source::Atom("a".into()),
            tuple: Source::X(0),
            index: 1,
        }],
    );
    assert_eq!(fault, Fault::IllegalContextForSetTupleElement);
}

// ---- catch and try -----------------------------------------------------

#[test]
fn balanced_catch_is_accepted() {
    check(
        1,
        vec![
            I::Allocate { live: 1, stack: 1 },
            I::Catch {
                dst: Register::Y(0),
                fail: 3,
            },
            I::Move {
                src: Source::Integer(42),
                dst: Register::X(0),
            },
            I::Label(3),
            I::CatchEnd(Register::Y(0)),
            I::Deallocate(1),
            I::Return,
        ],
    )
    .unwrap();
}

#[test]
fn try_case_delivers_the_exception_triple() {
    check(
        1,
        vec![
            I::Allocate { live: 1, stack: 1 },
            I::Try {
                dst: Register::Y(0),
                fail: 3,
            },
            I::Move {
                src: Source::Integer(1),
                dst: Register::X(0),
            },
            I::TryEnd(Register::Y(0)),
            I::Deallocate(1),
            I::Return,
            I::Label(3),
            I::TryCase(Register::Y(0)),
            I::Move {
                src: Source::X(1),
                dst: Register::X(0),
            },
            I::Deallocate(1),
            I::Return,
        ],
    )
    .unwrap();
}

#[test]
fn leaving_with_an_open_handler_is_rejected() {
    let fault = expect_fault(
        1,
        vec![
            I::Allocate { live: 1, stack: 1 },
            I::Catch {
                dst: Register::Y(0),
                fail: 3,
            },
            I::Deallocate(1),
        ],
    );
    assert_eq!(fault, Fault::UnfinishedCatchTry(1));
}

#[test]
fn nested_handlers_are_accepted_in_order() {
    check(
        1,
        vec![
            I::Allocate { live: 1, stack: 2 },
            I::Catch {
                dst: Register::Y(0),
                fail: 3,
            },
            I::Catch {
                dst: Register::Y(1),
                fail: 4,
            },
            I::Move {
                src: Source::Integer(1),
                dst: Register::X(0),
            },
            I::Label(4),
            I::CatchEnd(Register::Y(1)),
            I::Label(3),
            I::CatchEnd(Register::Y(0)),
            I::Deallocate(2),
            I::Return,
        ],
    )
    .unwrap();
}

/// Two paths that join at label 7 with different handler depths: one
/// installed a catch, the other did not, so `ct` is undecided there.
fn undecided_handler_prologue() -> Vec<Instruction> {
    vec![
        I::AllocateZero { live: 1, stack: 1 },
        I::IsNonemptyList {
            fail: 5,
            src: Source::X(0),
        },
        I::Catch {
            dst: Register::Y(0),
            fail: 6,
        },
        I::Jump(7),
        I::Label(5),
        I::Jump(7),
        I::Label(6),
        I::CatchEnd(Register::Y(0)),
        I::Deallocate(1),
        I::Return,
        I::Label(7),
    ]
}

#[test]
fn non_raising_instructions_ignore_an_undecided_handler_state() {
    // A select has no business with the enclosing handler and must
    // run even where the handler nesting could not be tracked.
    let mut body = undecided_handler_prologue();
    body.extend([
        I::SelectVal {
            src: Source::X(0),
            fail: 8,
            list: vec![(Operand::atom("a"), 8)],
        },
        I::Label(8),
        I::Wait(8),
    ]);
    check(1, body).unwrap();
}

#[test]
fn a_call_needs_a_known_handler_state() {
    let mut body = undecided_handler_prologue();
    body.push(I::CallExt {
        arity: 1,
        func: ExtFunc::new("lists", "reverse", 1),
    });
    let fault = expect_fault(1, body);
    assert_eq!(fault, Fault::UnknownCatchTryState);
}

#[test]
fn a_call_needs_an_unambiguous_handler() {
    // Same depth on both paths but different failure labels: the
    // innermost handler set has two members at the join.
    let fault = expect_fault(
        1,
        vec![
            I::AllocateZero { live: 1, stack: 1 },
            I::IsNonemptyList {
                fail: 5,
                src: Source::X(0),
            },
            I::Catch {
                dst: Register::Y(0),
                fail: 6,
            },
            I::Jump(7),
            I::Label(5),
            I::Catch {
                dst: Register::Y(0),
                fail: 9,
            },
            I::Jump(7),
            I::Label(6),
            I::Label(9),
            I::CatchEnd(Register::Y(0)),
            I::Deallocate(1),
            I::Return,
            I::Label(7),
            I::CallExt {
                arity: 1,
                func: ExtFunc::new("lists", "reverse", 1),
            },
        ],
    );
    assert_eq!(fault, Fault::AmbiguousCatchTryState);
}

// ---- floats ------------------------------------------------------------

#[test]
fn a_complete_float_block_is_accepted() {
    check(
        1,
        vec![
            I::Fclearerror,
            I::Fconv {
                src: Source::X(0),
                dst: 0,
            },
            I::Fmove {
                src: Operand::Float(1.5),
                dst: Operand::Fr(1),
            },
            I::Bif {
                op: "fadd".into(),
                fail: 0,
                args: vec![Operand::Fr(0), Operand::Fr(1)],
                dst: Operand::Fr(2),
            },
            I::Fcheckerror(0),
            I::TestHeap {
                heap: HeapNeed::Alloc { words: 0, floats: 1 },
                live: 1,
            },
            I::Fmove {
                src: Operand::Fr(2),
                dst: Operand::X(0),
            },
            I::Return,
        ],
    )
    .unwrap();
}

#[test]
fn uninitialized_float_registers_are_rejected() {
    let fault = expect_fault(
        1,
        vec![
            I::Fclearerror,
            I::Bif {
                op: "fadd".into(),
                fail: 0,
                args: vec![Operand::Fr(0), Operand::Fr(1)],
                dst: Operand::Fr(2),
            },
        ],
    );
    assert_eq!(fault, Fault::UninitializedReg(Operand::Fr(0)));
}

#[test]
fn ordinary_instructions_cannot_run_inside_a_float_block() {
    let fault = expect_fault(
        2,
        vec![I::Fclearerror, I::Send],
    );
    assert_eq!(fault, Fault::UnsafeInstruction);
}

#[test]
fn checking_an_unopened_block_is_rejected() {
    let fault = expect_fault(1, vec![I::Fcheckerror(0)]);
    assert_eq!(fault, Fault::BadFloatingPointState(FloatState::Undefined));
}

#[test]
fn boxing_a_float_needs_float_heap() {
    let fault = expect_fault(
        1,
        vec![
            I::Fclearerror,
            I::Fconv {
                src: Source::X(0),
                dst: 0,
            },
            I::Fcheckerror(0),
            I::Fmove {
                src: Operand::Fr(0),
                dst: Operand::X(0),
            },
        ],
    );
    assert_eq!(fault, Fault::HeapOverflow { needed: 1, left: 0 });
}

// ---- selects and refinement --------------------------------------------

#[test]
fn select_val_refines_through_a_type_test() {
    // x1 := is_map(x0); branching on x1 = true pins x0 to a map, so
    // using it as a tuple afterwards must be impossible.
    let fault = expect_fault(
        1,
        vec![
            I::Bif {
                op: "is_map".into(),
                fail: 0,
                args: vec![Operand::X(0)],
                dst: Operand::X(1),
            },
            I::SelectVal {
                src: Source::X(1),
                fail: 3,
                list: vec![
                    (Operand::atom("true"), 4),
                    (Operand::atom("false"), 3),
                ],
            },
            I::Label(3),
            I::Move {
                src: Source::Nil,
                dst: Register::X(0),
            },
            I::Return,
            I::Label(4),
            I::GetTupleElement {
                src: Source::X(0),
                index: 0,
                dst: Register::X(0),
            },
            I::Return,
        ],
    );
    assert!(matches!(fault, Fault::BadType { .. }));
}

#[test]
fn tuple_size_comparison_pins_the_arity() {
    // tuple_size(x0) == 2 makes x0 a pair; element 3 cannot exist.
    let fault = expect_fault(
        1,
        vec![
            I::Bif {
                op: "tuple_size".into(),
                fail: 0,
                args: vec![Operand::X(0)],
                dst: Operand::X(1),
            },
            I::IsEqExact {
                fail: 3,
                a: Source::X(1),
                b: Source::Integer(2),
            },
            I::GetTupleElement {
                src: Source::X(0),
                index: 2,
                dst: Register::X(2),
            },
            I::Return,
            I::Label(3),
            I::Move {
                src: Source::Nil,
                dst: Register::X(0),
            },
            I::Return,
        ],
    );
    assert!(matches!(fault, Fault::BadType { .. }));
}

#[test]
fn select_lists_must_share_one_type() {
    let fault = expect_fault(
        1,
        vec![I::SelectVal {
            src: Source::X(0),
            fail: 3,
            list: vec![(Operand::atom("a"), 3), (Operand::Integer(1), 3)],
        }],
    );
    assert_eq!(fault, Fault::BadSelectList);
}

#[test]
fn tuple_arity_dispatch() {
    check(
        1,
        vec![
            I::IsTuple {
                fail: 3,
                src: Source::X(0),
            },
            I::SelectTupleArity {
                src: Source::X(0),
                fail: 3,
                list: vec![(Operand::Integer(2), 4), (Operand::Integer(3), 5)],
            },
            I::Label(3),
            I::Badmatch(Source::X(0)),
            I::Label(4),
            I::GetTupleElement {
                src: Source::X(0),
                index: 1,
                dst: Register::X(0),
            },
            I::Return,
            I::Label(5),
            I::GetTupleElement {
                src: Source::X(0),
                index: 2,
                dst: Register::X(0),
            },
            I::Return,
        ],
    )
    .unwrap();

    let fault = expect_fault(
        1,
        vec![
            I::IsTuple {
                fail: 3,
                src: Source::X(0),
            },
            I::SelectTupleArity {
                src: Source::X(0),
                fail: 3,
                list: vec![(Operand::atom("two"), 4)],
            },
            I::Label(3),
            I::Badmatch(Source::X(0)),
            I::Label(4),
            I::Return,
        ],
    );
    assert_eq!(fault, Fault::BadTupleArityList);
}

// ---- binary matching ---------------------------------------------------

#[test]
fn match_context_lifecycle() {
    check(
        1,
        vec![
            I::BsStartMatch2 {
                fail: 3,
                live: 1,
                src: Operand::X(0),
                slots: 2,
                dst: Register::X(0),
            },
            I::BsSave2 {
                ctx: Source::X(0),
                slot: SavePoint::Slot(0),
            },
            I::BsGetInteger2 {
                fail: 3,
                live: 1,
                ctx: Source::X(0),
                size: Source::Integer(8),
                unit: 1,
                flags: Operand::List(vec![]),
                dst: Register::X(1),
            },
            I::BsRestore2 {
                ctx: Source::X(0),
                slot: SavePoint::Slot(0),
            },
            I::BsTestTail2 {
                fail: 3,
                ctx: Source::X(0),
                bits: 0,
            },
            I::Move {
                src: Source::Atom("ok".into()),
                dst: Register::X(0),
            },
            I::Return,
            I::Label(3),
            I::Move {
                src: Source::Nil,
                dst: Register::X(0),
            },
            I::Return,
        ],
    )
    .unwrap();
}

#[test]
fn restoring_an_unsaved_slot_is_rejected() {
    let fault = expect_fault(
        1,
        vec![
            I::BsStartMatch2 {
                fail: 3,
                live: 1,
                src: Operand::X(0),
                slots: 2,
                dst: Register::X(0),
            },
            I::BsRestore2 {
                ctx: Source::X(0),
                slot: SavePoint::Slot(1),
            },
            I::Label(3),
            I::Return,
        ],
    );
    assert_eq!(fault, Fault::IllegalRestore(1));
}

#[test]
fn saving_past_the_slot_count_is_rejected() {
    let fault = expect_fault(
        1,
        vec![
            I::BsStartMatch2 {
                fail: 3,
                live: 1,
                src: Operand::X(0),
                slots: 2,
                dst: Register::X(0),
            },
            I::BsSave2 {
                ctx: Source::X(0),
                slot: SavePoint::Slot(5),
            },
            I::Label(3),
            I::Return,
        ],
    );
    assert_eq!(fault, Fault::IllegalSave(5));
}

#[test]
fn binary_instructions_need_a_context() {
    let fault = expect_fault(
        1,
        vec![I::BsSave2 {
            ctx: Source::X(0),
            slot: SavePoint::Slot(0),
        }],
    );
    assert_eq!(fault, Fault::NoBsmContext(Operand::X(0)));
}

#[test]
fn binary_construction_is_accepted() {
    check(
        1,
        vec![
            I::BsInit2 {
                fail: 0,
                size: Source::Integer(8),
                heap: 0,
                live: 1,
                flags: Operand::List(vec![]),
                dst: Register::X(1),
            },
            I::BsPutInteger {
                fail: 0,
                size: Source::Integer(8),
                unit: 1,
                flags: Operand::List(vec![]),
                src: Source::Integer(255),
            },
            I::Move {
                src: Source::X(1),
                dst: Register::X(0),
            },
            I::Return,
        ],
    )
    .unwrap();
}

// ---- tail calls with a match context -----------------------------------

fn context_consumer(name: &str, entry: u32) -> Function {
    func(
        name,
        1,
        entry,
        vec![
            I::BsStartMatch2 {
                fail: entry + 1,
                live: 1,
                src: Operand::X(0),
                slots: 0,
                dst: Register::X(0),
            },
            I::Label(entry + 1),
            I::Move {
                src: Source::Nil,
                dst: Register::X(0),
            },
            I::Return,
        ],
    )
}

#[test]
fn tail_calling_a_match_start_with_a_context_is_accepted() {
    let caller = func(
        "f",
        1,
        2,
        vec![
            I::BsStartMatch2 {
                fail: 3,
                live: 1,
                src: Operand::X(0),
                slots: 0,
                dst: Register::X(0),
            },
            I::CallOnly { arity: 1, label: 12 },
            I::Label(3),
            I::Move {
                src: Source::Nil,
                dst: Register::X(0),
            },
            I::Return,
        ],
    );
    validate(&module_of(vec![caller, context_consumer("g", 12)])).unwrap();
}

#[test]
fn tail_calling_a_plain_function_with_a_context_is_rejected() {
    let caller = func(
        "f",
        1,
        2,
        vec![
            I::BsStartMatch2 {
                fail: 3,
                live: 1,
                src: Operand::X(0),
                slots: 0,
                dst: Register::X(0),
            },
            I::CallOnly { arity: 1, label: 12 },
            I::Label(3),
            I::Move {
                src: Source::Nil,
                dst: Register::X(0),
            },
            I::Return,
        ],
    );
    let plain = func("g", 1, 12, vec![I::Return]);
    let err = validate(&module_of(vec![caller, plain])).expect_err("context dropped");
    assert_eq!(err.diagnostics[0].fault(), Some(&Fault::NoBsStartMatch2(12)));
}

#[test]
fn two_contexts_cannot_be_passed_at_once() {
    let caller = func(
        "f",
        2,
        2,
        vec![
            I::BsStartMatch2 {
                fail: 3,
                live: 2,
                src: Operand::X(0),
                slots: 0,
                dst: Register::X(0),
            },
            I::BsStartMatch2 {
                fail: 3,
                live: 2,
                src: Operand::X(1),
                slots: 0,
                dst: Register::X(1),
            },
            I::CallOnly { arity: 2, label: 12 },
            I::Label(3),
            I::Move {
                src: Source::Nil,
                dst: Register::X(0),
            },
            I::Return,
        ],
    );
    let callee = context_consumer("g", 12);
    let err = validate(&module_of(vec![caller, callee])).expect_err("two contexts");
    assert!(matches!(
        err.diagnostics[0].fault(),
        Some(Fault::MultipleMatchContexts(_))
    ));
}

// ---- calls and liveness ------------------------------------------------

#[test]
fn live_counts_are_checked() {
    let fault = expect_fault(
        1,
        vec![I::CallExt {
            arity: 2,
            func: ExtFunc::new("lists", "member", 2),
        }],
    );
    assert_eq!(fault, Fault::NotLive(Register::X(1)));

    let fault = expect_fault(
        1,
        vec![I::GcBif {
            op: "length".into(),
            fail: 0,
            live: 2000,
            args: vec![Source::X(0)],
            dst: Register::X(0),
        }],
    );
    assert_eq!(fault, Fault::BadNumberOfLiveRegs(2000));
}

#[test]
fn a_call_prunes_everything_above_x0() {
    let fault = expect_fault(
        2,
        vec![
            I::CallExt {
                arity: 1,
                func: ExtFunc::new("lists", "reverse", 1),
            },
            I::Move {
                src: Source::X(1),
                dst: Register::X(0),
            },
        ],
    );
    assert_eq!(fault, Fault::UninitializedReg(Operand::X(1)));
}

#[test]
fn calls_that_only_raise_kill_the_stream() {
    // Nothing after erlang:error/1 runs, so even nonsense passes.
    check(
        1,
        vec![
            I::CallExt {
                arity: 1,
                func: ExtFunc::new("erlang", "error", 1),
            },
            I::Move {
                src: Source::X(9),
                dst: Register::X(0),
            },
        ],
    )
    .unwrap();
}

#[test]
fn gc_bifs_require_a_walkable_stack() {
    let fault = expect_fault(
        1,
        vec![
            I::Allocate { live: 1, stack: 1 },
            I::GcBif {
                op: "length".into(),
                fail: 0,
                live: 1,
                args: vec![Source::X(0)],
                dst: Register::X(0),
            },
        ],
    );
    assert_eq!(fault, Fault::UninitializedReg(Operand::Y(0)));
}

// ---- maps --------------------------------------------------------------

#[test]
fn map_probing() {
    check(
        1,
        vec![
            I::IsMap {
                fail: 3,
                src: Source::X(0),
            },
            I::HasMapFields {
                fail: 3,
                src: Source::X(0),
                keys: vec![Operand::atom("k")],
            },
            I::GetMapElements {
                fail: 3,
                src: Source::X(0),
                list: vec![Operand::atom("k"), Operand::X(1)],
            },
            I::Move {
                src: Source::X(1),
                dst: Register::X(0),
            },
            I::Return,
            I::Label(3),
            I::Move {
                src: Source::Nil,
                dst: Register::X(0),
            },
            I::Return,
        ],
    )
    .unwrap();
}

#[test]
fn map_field_lists_must_be_nonempty_and_unique() {
    let fault = expect_fault(
        1,
        vec![
            I::IsMap {
                fail: 3,
                src: Source::X(0),
            },
            I::HasMapFields {
                fail: 3,
                src: Source::X(0),
                keys: vec![],
            },
            I::Label(3),
            I::Return,
        ],
    );
    assert_eq!(fault, Fault::EmptyFieldList);

    let fault = expect_fault(
        1,
        vec![
            I::IsMap {
                fail: 3,
                src: Source::X(0),
            },
            I::GetMapElements {
                fail: 3,
                src: Source::X(0),
                list: vec![
                    Operand::atom("k"),
                    Operand::X(1),
                    Operand::atom("k"),
                    Operand::X(2),
                ],
            },
            I::Label(3),
            I::Return,
        ],
    );
    assert_eq!(fault, Fault::KeysNotUnique);
}

// ---- labels and headers ------------------------------------------------

#[test]
fn branches_to_undefined_labels_are_reported() {
    let err = check(1, vec![I::Jump(77)]).expect_err("undefined label");
    assert_eq!(err.diagnostics[0].cause, Cause::UndefLabels(vec![77]));
}

#[test]
fn the_entry_label_must_exist() {
    let code = vec![
        I::Label(1),
        I::FuncInfo {
            module: "t".into(),
            function: "f".into(),
            arity: 0,
        },
        I::Label(2),
        I::Return,
    ];
    let f = Function::new("f", 0, 9, code);
    let err = validate(&module_of(vec![f])).expect_err("entry label missing");
    assert_eq!(err.diagnostics[0].fault(), Some(&Fault::NoEntryLabel(9)));
}

#[test]
fn the_entry_stub_must_stay_reachable_with_clean_state() {
    let code = vec![
        I::Label(1),
        I::FuncInfo {
            module: "t".into(),
            function: "f".into(),
            arity: 1,
        },
        I::Label(2),
        I::Allocate { live: 1, stack: 1 },
        I::Jump(1),
    ];
    let f = Function::new("f", 1, 2, code);
    let err = validate(&module_of(vec![f])).expect_err("frame reaches the stub");
    assert_eq!(
        err.diagnostics[0].fault(),
        Some(&Fault::ExistingStackFrame(1))
    );
}

#[test]
fn dead_code_after_a_jump_is_ignored() {
    check(
        1,
        vec![
            I::Jump(3),
            I::Move {
                src: Source::X(9),
                dst: Register::X(0),
            },
            I::Label(3),
            I::Return,
        ],
    )
    .unwrap();
}

// ---- receive -----------------------------------------------------------

#[test]
fn a_receive_loop_is_accepted() {
    check(
        0,
        vec![
            I::Label(4),
            I::LoopRec {
                fail: 3,
                dst: Register::X(0),
            },
            I::RemoveMessage,
            I::Return,
            I::Label(3),
            I::Wait(4),
        ],
    )
    .unwrap();
}

#[test]
fn removed_messages_may_reach_the_stack() {
    check(
        0,
        vec![
            I::AllocateZero { live: 0, stack: 1 },
            I::Label(4),
            I::LoopRec {
                fail: 3,
                dst: Register::X(0),
            },
            I::RemoveMessage,
            I::Move {
                src: Source::X(0),
                dst: Register::Y(0),
            },
            I::Move {
                src: Source::Y(0),
                dst: Register::X(0),
            },
            I::Deallocate(1),
            I::Return,
            I::Label(3),
            I::Wait(4),
        ],
    )
    .unwrap();
}

// ---- extensions --------------------------------------------------------

struct SwapHint;

impl OpcodeHandler for SwapHint {
    fn name(&self) -> &str {
        "swap"
    }

    fn validate(&self, args: &[Operand], view: &mut StateView<'_, '_>) -> Result<Flow, Fault> {
        let [a, b] = args else {
            return Err(Fault::IllegalInstruction);
        };
        let (Some(ra), Some(rb)) = (a.register(), b.register()) else {
            return Err(Fault::IllegalInstruction);
        };
        let ta = view.source_type(&ra.into())?;
        let tb = view.source_type(&rb.into())?;
        view.set_register(ra, tb)?;
        view.set_register(rb, ta)?;
        Ok(Flow::Continue)
    }
}

#[test]
fn unknown_opcodes_are_rejected_without_a_handler() {
    let fault = expect_fault(
        2,
        vec![I::Custom {
            name: "swap".into(),
            args: vec![Operand::X(0), Operand::X(1)],
        }],
    );
    assert_eq!(fault, Fault::UnknownInstruction("swap".into()));
}

#[test]
fn handlers_extend_the_catalogue() {
    let module = module_of(vec![func(
        "f",
        2,
        2,
        vec![
            I::Custom {
                name: "swap".into(),
                args: vec![Operand::X(0), Operand::X(1)],
            },
            I::Return,
        ],
    )]);
    let options = Options::new().with_handler(Box::new(SwapHint));
    validate_with(&module, &options).unwrap();
}

// ---- whole-module behaviour --------------------------------------------

#[test]
fn every_bad_function_gets_its_own_diagnostic() {
    let good = func("ok", 1, 2, vec![I::Return]);
    let bad1 = func(
        "a",
        1,
        4,
        vec![I::Move {
            src: Source::X(3),
            dst: Register::X(0),
        }],
    );
    let bad2 = func("b", 1, 6, vec![I::Allocate { live: 1, stack: 1 }, I::Return]);
    let err = validate(&module_of(vec![good, bad1, bad2])).expect_err("two bad functions");
    assert_eq!(err.module, "t");
    assert_eq!(err.diagnostics.len(), 2);
    assert_eq!(err.diagnostics[0].mfa.function, "a");
    assert_eq!(err.diagnostics[1].mfa.function, "b");
}
