use core::fmt;

/// Atom name. Atom tables are the loader's business; the assembly level
/// carries plain owned names.
pub type Atom = String;

/// A literal term as it appears in a `literal` operand or a module
/// attribute.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Term {
    /// An atom.
    Atom(Atom),
    /// A signed integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// The empty list.
    Nil,
    /// A proper list.
    List(Vec<Term>),
    /// A tuple.
    Tuple(Vec<Term>),
    /// A binary, in whole bytes.
    Binary(Vec<u8>),
    /// A map as a key/value association list.
    Map(Vec<(Term, Term)>),
}

impl Term {
    /// Convenience constructor for an atom literal.
    pub fn atom(name: &str) -> Self {
        Term::Atom(name.to_string())
    }

    /// The arity of the term if it is a tuple.
    pub const fn tuple_arity(&self) -> Option<usize> {
        match self {
            Term::Tuple(elements) => Some(elements.len()),
            _ => None,
        }
    }
}

impl From<i64> for Term {
    fn from(i: i64) -> Self {
        Term::Int(i)
    }
}

impl From<f64> for Term {
    fn from(f: f64) -> Self {
        Term::Float(f)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom(a) => write!(f, "{a}"),
            Term::Int(i) => write!(f, "{i}"),
            Term::Float(x) => write!(f, "{x:?}"),
            Term::Nil => write!(f, "[]"),
            Term::List(elements) => {
                write!(f, "[")?;
                fmt_comma_separated(f, elements)?;
                write!(f, "]")
            }
            Term::Tuple(elements) => {
                write!(f, "{{")?;
                fmt_comma_separated(f, elements)?;
                write!(f, "}}")
            }
            Term::Binary(bytes) => {
                write!(f, "<<")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{b}")?;
                }
                write!(f, ">>")
            }
            Term::Map(pairs) => {
                write!(f, "#{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{k} => {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn fmt_comma_separated(f: &mut fmt::Formatter<'_>, elements: &[Term]) -> fmt::Result {
    for (i, e) in elements.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{e}")?;
    }
    Ok(())
}
