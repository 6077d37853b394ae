//! Abstract types for register contents.
//!
//! Each X or Y slot carries one type from a fixed lattice. `merge` is
//! the join applied at control-flow joins and only ever loses
//! precision; `meet` is the refinement applied by type tests and
//! preconditions and fails when the two sides are incompatible.

use core::fmt;
use std::collections::BTreeSet;

use beam_asm::{Label, Source, Term};

/// Set of failure labels guarded by one handler tag.
pub type LabelSet = BTreeSet<Label>;

/// The floating point error state automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FloatState {
    /// No float block has run yet.
    Undefined,
    /// Inside a float block; the error flag is clear.
    Cleared,
    /// The previous float block was checked.
    Checked,
}

/// Mints match-context identities. Two contexts compare equal only if
/// their ids match; a join of two different ids gets a fresh one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CtxIdGen {
    next: u64,
}

impl CtxIdGen {
    /// A context id never handed out before by this generator.
    pub fn fresh(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// An opaque binary-match state with a fixed number of save slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchCtx {
    /// Identity; survives cloning, fresh after a join of unequal ids.
    pub id: u64,
    /// Bit mask of save slots holding a valid position.
    pub valid: u64,
    /// Number of save slots.
    pub slots: u32,
}

impl MatchCtx {
    /// Whether `slot` holds a saved position.
    pub const fn has_saved(&self, slot: u32) -> bool {
        self.valid & (1 << slot) != 0
    }

    /// Copy of this context with `slot` marked saved.
    pub const fn with_saved(mut self, slot: u32) -> Self {
        self.valid |= 1 << slot;
        self
    }
}

/// Tuple size knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Arity {
    /// Exactly this many elements.
    Exact(u32),
    /// At least this many elements.
    AtLeast(u32),
}

impl Arity {
    /// The guaranteed lower bound.
    pub const fn min_size(&self) -> u32 {
        match self {
            Arity::Exact(n) | Arity::AtLeast(n) => *n,
        }
    }
}

/// The abstract type of one register slot.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Type {
    /// Nothing stored yet; reads are illegal. Y registers only.
    Uninitialized,
    /// Holds a GC-safe but otherwise unknown value. Y registers only.
    Initialized,
    /// A catch handler tag. Y registers only.
    Catchtag(LabelSet),
    /// A try handler tag. Y registers only.
    Trytag(LabelSet),
    /// A binary match context.
    MatchContext(MatchCtx),
    /// A tuple between its `put_tuple` and the last `put`.
    TupleInProgress,
    /// Marker for calls that only ever raise; never stored.
    Exception,
    /// Any term.
    Term,
    /// `true` or `false`.
    Bool,
    /// A cons cell.
    Cons,
    /// The empty list.
    Nil,
    /// A tuple of (partially) known size.
    Tuple(Arity),
    /// An atom, possibly a specific one.
    Atom(Option<beam_asm::Atom>),
    /// An integer, possibly a specific one.
    Integer(Option<i64>),
    /// A float, possibly a specific one.
    Float(Option<f64>),
    /// An integer or a float.
    Number,
    /// A map.
    Map,
    /// A bitstring.
    Binary,
    /// A specific compound literal.
    Literal(Term),
    /// A term reachable only from a transient root; must not be
    /// stored in a Y register until its removal event.
    Fragile(Box<Type>),
}

impl Type {
    /// The type of an immediate operand; `None` for registers.
    pub fn of_immediate(src: &Source) -> Option<Type> {
        match src {
            Source::X(_) | Source::Y(_) => None,
            Source::Atom(a) => Some(Type::Atom(Some(a.clone()))),
            Source::Integer(i) => Some(Type::Integer(Some(*i))),
            Source::Float(x) => Some(Type::Float(Some(*x))),
            Source::Nil => Some(Type::Nil),
            Source::Literal(t) => Some(Type::of_literal(t)),
        }
    }

    /// The type of a literal term. Scalars collapse to their specific
    /// immediate type; compounds keep the literal itself.
    pub fn of_literal(t: &Term) -> Type {
        match t {
            Term::Atom(a) => Type::Atom(Some(a.clone())),
            Term::Int(i) => Type::Integer(Some(*i)),
            Term::Float(x) => Type::Float(Some(*x)),
            Term::Nil => Type::Nil,
            Term::List(els) if els.is_empty() => Type::Nil,
            _ => Type::Literal(t.clone()),
        }
    }

    /// Whether the wrapper marks the value as outside the root set.
    pub const fn is_fragile(&self) -> bool {
        matches!(self, Type::Fragile(_))
    }

    /// The type with any fragility wrapper removed.
    pub fn strip_fragile(&self) -> &Type {
        match self {
            Type::Fragile(inner) => inner,
            other => other,
        }
    }

    /// Wraps the type as fragile. Idempotent.
    pub fn fragile(self) -> Type {
        match self {
            Type::Fragile(_) => self,
            other => Type::Fragile(Box::new(other)),
        }
    }

    /// Whether a Y register holding this type survives a garbage
    /// collection. Handler tags are recognised by the collector.
    pub fn is_gc_safe(&self) -> bool {
        !matches!(self, Type::Uninitialized)
    }
}

/// Structural head type of a compound literal.
fn literal_head(t: &Term) -> Type {
    match t {
        Term::Tuple(els) => Type::Tuple(Arity::Exact(els.len() as u32)),
        Term::List(_) => Type::Cons,
        Term::Binary(_) => Type::Binary,
        Term::Map(_) => Type::Map,
        scalar => Type::of_literal(scalar),
    }
}

/// Least upper bound of two types at a control-flow join.
pub fn merge(a: &Type, b: &Type, ids: &mut CtxIdGen) -> Type {
    use Type::*;

    if a.is_fragile() || b.is_fragile() {
        let inner = merge(a.strip_fragile(), b.strip_fragile(), ids);
        return inner.fragile();
    }
    match (a, b) {
        (Uninitialized, _) | (_, Uninitialized) => Uninitialized,
        (Catchtag(s1), Catchtag(s2)) => Catchtag(s1 | s2),
        (Trytag(s1), Trytag(s2)) => Trytag(s1 | s2),
        // A handler tag meeting anything else leaves the slot unusable.
        (Catchtag(_) | Trytag(_), _) | (_, Catchtag(_) | Trytag(_)) => Uninitialized,
        (Initialized, _) | (_, Initialized) => Initialized,
        (MatchContext(m1), MatchContext(m2)) => {
            let id = if m1.id == m2.id { m1.id } else { ids.fresh() };
            MatchContext(MatchCtx {
                id,
                valid: m1.valid & m2.valid,
                slots: m1.slots.min(m2.slots),
            })
        }
        (MatchContext(_), _) | (_, MatchContext(_)) => Term,
        (TupleInProgress, TupleInProgress) => TupleInProgress,
        (TupleInProgress, _) | (_, TupleInProgress) => Term,
        // Always widens, even for two equal exact sizes.
        (Tuple(x), Tuple(y)) => Tuple(Arity::AtLeast(x.min_size().min(y.min_size()))),
        _ if a == b => a.clone(),
        (Bool, Atom(v)) | (Atom(v), Bool) => match v.as_deref() {
            Some("true") | Some("false") => Bool,
            _ => Atom(None),
        },
        (Atom(_), Atom(_)) => Atom(None),
        (Literal(l1), Literal(l2)) => {
            let (h1, h2) = (literal_head(l1), literal_head(l2));
            merge(&h1, &h2, ids)
        }
        (Literal(l), other) | (other, Literal(l)) => merge(&literal_head(l), other, ids),
        (Integer(_), Integer(_)) => Integer(None),
        (Float(_), Float(_)) => Float(None),
        (Integer(_) | Float(_) | Number, Integer(_) | Float(_) | Number) => Number,
        _ => Term,
    }
}

/// Narrows `actual` by `needed`. `None` means the two cannot describe
/// the same value. Fragility of `actual` is preserved.
pub fn meet(actual: &Type, needed: &Type) -> Option<Type> {
    use Type::*;

    if actual.is_fragile() {
        return meet(actual.strip_fragile(), needed).map(Type::fragile);
    }
    if actual == needed {
        return Some(actual.clone());
    }
    match (actual, needed) {
        (Term | Initialized, t) => Some(t.clone()),
        (t, Term) => Some(t.clone()),
        (Atom(None), Atom(Some(_))) => Some(needed.clone()),
        (Atom(Some(_)), Atom(None)) => Some(actual.clone()),
        (Bool, Atom(None)) | (Atom(None), Bool) => Some(Bool),
        (Bool, Atom(Some(v))) if v == "true" || v == "false" => Some(needed.clone()),
        (Atom(Some(v)), Bool) if v == "true" || v == "false" => Some(actual.clone()),
        (Integer(None), Integer(Some(_))) => Some(needed.clone()),
        (Integer(Some(_)), Integer(None)) => Some(actual.clone()),
        (Float(None), Float(Some(_))) => Some(needed.clone()),
        (Float(Some(_)), Float(None)) => Some(actual.clone()),
        (Number, Integer(_) | Float(_)) => Some(needed.clone()),
        (Integer(_) | Float(_), Number) => Some(actual.clone()),
        (Tuple(a), Tuple(b)) => match (a, b) {
            (Arity::Exact(n), Arity::AtLeast(m)) if n >= m => Some(Tuple(Arity::Exact(*n))),
            (Arity::AtLeast(n), Arity::Exact(m)) if m >= n => Some(Tuple(Arity::Exact(*m))),
            (Arity::AtLeast(n), Arity::AtLeast(m)) => Some(Tuple(Arity::AtLeast(*n.max(m)))),
            _ => None,
        },
        (Literal(l), t) => {
            let head = literal_head(l);
            meet(&head, t).map(|r| if r == head { Literal(l.clone()) } else { r })
        }
        (t, Literal(l)) => meet(t, &literal_head(l)).map(|_| Literal(l.clone())),
        _ => None,
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Uninitialized => write!(f, "uninitialized"),
            Type::Initialized => write!(f, "initialized"),
            Type::Catchtag(_) => write!(f, "catch tag"),
            Type::Trytag(_) => write!(f, "try tag"),
            Type::MatchContext(_) => write!(f, "match context"),
            Type::TupleInProgress => write!(f, "tuple under construction"),
            Type::Exception => write!(f, "exception"),
            Type::Term => write!(f, "term"),
            Type::Bool => write!(f, "bool"),
            Type::Cons => write!(f, "cons"),
            Type::Nil => write!(f, "nil"),
            Type::Tuple(Arity::Exact(n)) => write!(f, "tuple of size {n}"),
            Type::Tuple(Arity::AtLeast(n)) => write!(f, "tuple of size {n} or more"),
            Type::Atom(None) => write!(f, "atom"),
            Type::Atom(Some(a)) => write!(f, "atom '{a}'"),
            Type::Integer(None) => write!(f, "integer"),
            Type::Integer(Some(i)) => write!(f, "integer {i}"),
            Type::Float(None) => write!(f, "float"),
            Type::Float(Some(x)) => write!(f, "float {x:?}"),
            Type::Number => write!(f, "number"),
            Type::Map => write!(f, "map"),
            Type::Binary => write!(f, "binary"),
            Type::Literal(t) => write!(f, "literal {t}"),
            Type::Fragile(t) => write!(f, "fragile {t}"),
        }
    }
}
