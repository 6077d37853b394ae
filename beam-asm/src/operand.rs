use core::fmt;

use crate::term::{Atom, Term};

/// A code label. Label 0 is reserved: as a branch target it means
/// "cause an exception" rather than a jump.
pub type Label = u32;

/// An X or Y register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Register {
    /// Call-convention and scratch register.
    X(u16),
    /// Stack slot in the current frame.
    Y(u16),
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::X(n) => write!(f, "{{x,{n}}}"),
            Register::Y(n) => write!(f, "{{y,{n}}}"),
        }
    }
}

/// An operand that may act as a data source: a register or an
/// immediate value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Source {
    /// An X register.
    X(u16),
    /// A Y register.
    Y(u16),
    /// An immediate atom.
    Atom(Atom),
    /// An immediate integer.
    Integer(i64),
    /// An immediate float.
    Float(f64),
    /// The empty list.
    Nil,
    /// A compound literal.
    Literal(Term),
}

impl Source {
    /// Shorthand for an atom source.
    pub fn atom(name: &str) -> Self {
        Source::Atom(name.to_string())
    }

    /// The register behind this source, if it is one.
    pub const fn reg(&self) -> Option<Register> {
        match self {
            Source::X(n) => Some(Register::X(*n)),
            Source::Y(n) => Some(Register::Y(*n)),
            _ => None,
        }
    }
}

impl From<Register> for Source {
    fn from(r: Register) -> Self {
        match r {
            Register::X(n) => Source::X(n),
            Register::Y(n) => Source::Y(n),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::X(n) => write!(f, "{{x,{n}}}"),
            Source::Y(n) => write!(f, "{{y,{n}}}"),
            Source::Atom(a) => write!(f, "{{atom,{a}}}"),
            Source::Integer(i) => write!(f, "{{integer,{i}}}"),
            Source::Float(x) => write!(f, "{{float,{x:?}}}"),
            Source::Nil => write!(f, "nil"),
            Source::Literal(t) => write!(f, "{{literal,{t}}}"),
        }
    }
}

/// Any operand form an instruction may carry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operand {
    /// An X register.
    X(u16),
    /// A Y register.
    Y(u16),
    /// A float register.
    Fr(u16),
    /// A code label.
    Label(Label),
    /// An immediate atom.
    Atom(Atom),
    /// An immediate integer.
    Integer(i64),
    /// An immediate float.
    Float(f64),
    /// The empty list.
    Nil,
    /// A compound literal.
    Literal(Term),
    /// A nested operand list.
    List(Vec<Operand>),
}

impl Operand {
    /// Shorthand for an atom operand.
    pub fn atom(name: &str) -> Self {
        Operand::Atom(name.to_string())
    }

    /// Narrow to a source operand, if this form is one.
    pub fn source(&self) -> Option<Source> {
        match self {
            Operand::X(n) => Some(Source::X(*n)),
            Operand::Y(n) => Some(Source::Y(*n)),
            Operand::Atom(a) => Some(Source::Atom(a.clone())),
            Operand::Integer(i) => Some(Source::Integer(*i)),
            Operand::Float(x) => Some(Source::Float(*x)),
            Operand::Nil => Some(Source::Nil),
            Operand::Literal(t) => Some(Source::Literal(t.clone())),
            _ => None,
        }
    }

    /// Narrow to an X or Y register.
    pub const fn register(&self) -> Option<Register> {
        match self {
            Operand::X(n) => Some(Register::X(*n)),
            Operand::Y(n) => Some(Register::Y(*n)),
            _ => None,
        }
    }

    /// Narrow to a float register index.
    pub const fn fr(&self) -> Option<u16> {
        match self {
            Operand::Fr(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<Source> for Operand {
    fn from(s: Source) -> Self {
        match s {
            Source::X(n) => Operand::X(n),
            Source::Y(n) => Operand::Y(n),
            Source::Atom(a) => Operand::Atom(a),
            Source::Integer(i) => Operand::Integer(i),
            Source::Float(x) => Operand::Float(x),
            Source::Nil => Operand::Nil,
            Source::Literal(t) => Operand::Literal(t),
        }
    }
}

impl From<Register> for Operand {
    fn from(r: Register) -> Self {
        match r {
            Register::X(n) => Operand::X(n),
            Register::Y(n) => Operand::Y(n),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::X(n) => write!(f, "{{x,{n}}}"),
            Operand::Y(n) => write!(f, "{{y,{n}}}"),
            Operand::Fr(n) => write!(f, "{{fr,{n}}}"),
            Operand::Label(l) => write!(f, "{{f,{l}}}"),
            Operand::Atom(a) => write!(f, "{{atom,{a}}}"),
            Operand::Integer(i) => write!(f, "{{integer,{i}}}"),
            Operand::Float(x) => write!(f, "{{float,{x:?}}}"),
            Operand::Nil => write!(f, "nil"),
            Operand::Literal(t) => write!(f, "{{literal,{t}}}"),
            Operand::List(elements) => {
                write!(f, "{{list,[")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]}}")
            }
        }
    }
}
