//! Bytecode verifier for a register-based functional-language
//! virtual machine.
//!
//! The verifier statically rejects modules whose instruction stream
//! could crash the emulator, corrupt memory or break garbage
//! collection, while deliberately ignoring ordinary type errors that
//! just raise at run time. Each function is checked independently by
//! an abstract interpreter that threads a small machine state through
//! the instructions and joins states at every label.
//!
//! ```
//! use beam_asm::{Function, Instruction, Module};
//! use beam_validate::validate;
//!
//! let code = vec![
//!     Instruction::Label(1),
//!     Instruction::FuncInfo {
//!         module: "m".into(),
//!         function: "id".into(),
//!         arity: 1,
//!     },
//!     Instruction::Label(2),
//!     Instruction::Return,
//! ];
//! let module = Module::new(
//!     "m",
//!     vec![],
//!     vec![],
//!     vec![Function::new("id", 1, 2, code)],
//!     3,
//! );
//! assert!(validate(&module).is_ok());
//! ```

pub mod consts;
pub mod error;
pub mod extension;
pub mod prescan;
pub mod state;
pub mod types;
pub mod validator;

mod report;

pub use crate::error::{Cause, Diagnostic, Fault, FaultKind, ValidateError};
pub use crate::extension::{Flow, OpcodeHandler, Options, StateView};
pub use crate::validator::{validate, validate_function, validate_with};

pub mod prelude {
    //! Common imports for hosts and tests.
    pub use beam_asm::{
        ExtFunc, Function, HeapNeed, Instruction, Label, Mfa, Module, Operand, Register,
        SavePoint, Source, Term,
    };

    pub use crate::error::{Cause, Diagnostic, Fault, FaultKind, ValidateError};
    pub use crate::extension::{Flow, OpcodeHandler, Options, StateView};
    pub use crate::validator::{validate, validate_function, validate_with};
}
