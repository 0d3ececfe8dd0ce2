//! The value universe shared by the AST, engine state, and host protocol.
//!
//! `RValue` is the full tagged union a script can write down in source.
//! `SimpleValue` is the subset that can actually be stored (in state, in the
//! query-answer cache, or handed back across the host boundary).

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Cheaply-cloned interned-ish string, used for identifiers and literals
/// throughout the AST.
pub type Str = Rc<str>;

/// The subset of values that may live in engine state or be handed back as
/// a query answer. Also the host-facing wire type for query arguments and
/// answers, so it carries `serde` derives alongside the AST-only types in
/// this module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SimpleValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(Str),
}

/// The full value grammar a script can write: a `SimpleValue` plus variable
/// references and (possibly nested) method calls.
#[derive(Clone, Debug, PartialEq)]
pub enum RValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(Str),
    Variable(Str),
    MethodCall(MethodCall),
}

/// A call to a host-supplied method: a name plus its argument expressions.
/// Arguments are plain `RValue`s in a `Vec` — the `Vec` already bounds the
/// recursive type's size, so no extra boxing is needed to let a method
/// call nest another method call in its arguments. There are no actual
/// cycles, just sharing to bound the recursive type's size.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodCall {
    pub name: Str,
    pub args: Vec<RValue>,
}

impl MethodCall {
    pub fn new(name: impl Into<Str>, args: Vec<RValue>) -> Self {
        MethodCall {
            name: name.into(),
            args,
        }
    }

    /// The cache key under which this call's answer is stored:
    /// `method|arg1|arg2|…`, with each argument already resolved to a
    /// `SimpleValue` and stringified canonically.
    pub fn call_key(&self, resolved_args: &[SimpleValue]) -> String {
        let mut key = self.name.to_string();
        for arg in resolved_args {
            key.push('|');
            key.push_str(&arg.to_canonical_string());
        }
        key
    }

    /// Authoring/debug form, e.g. `is_admin(3, "x")`. Used only in
    /// diagnostics and log lines, never in the host-facing protocol.
    pub fn debug_form(&self) -> String {
        let args: Vec<String> = self.args.iter().map(RValue::debug_form).collect();
        format!("{}({})", self.name, args.join(", "))
    }
}

/// Comparators usable in a conditional atom.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Comparator {
    Truthy,
    NotTruthy,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Comparator {
    /// Whether this comparator expects a right-hand operand. Only true for
    /// the comparators, not the truthy checks.
    pub fn expects_operand(self) -> bool {
        !matches!(self, Comparator::Truthy | Comparator::NotTruthy)
    }
}

impl SimpleValue {
    /// bool -> itself; int/float -> non-zero; string -> non-empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            SimpleValue::Bool(b) => *b,
            SimpleValue::Int(i) => *i != 0,
            SimpleValue::Float(f) => *f != 0.0,
            SimpleValue::Str(s) => !s.is_empty(),
        }
    }

    /// Canonical stringification used for call keys and text insertions:
    /// full precision for floats, verbatim for strings.
    pub fn to_canonical_string(&self) -> String {
        match self {
            SimpleValue::Bool(b) => b.to_string(),
            SimpleValue::Int(i) => i.to_string(),
            SimpleValue::Float(f) => format!("{}", f),
            SimpleValue::Str(s) => s.to_string(),
        }
    }

    /// Debug-output stringification: floats are fixed at two fractional
    /// digits, everything else matches the canonical form.
    pub fn to_debug_string(&self) -> String {
        match self {
            SimpleValue::Float(f) => format!("{:.2}", f),
            other => other.to_canonical_string(),
        }
    }

    /// Compare `self` against `other` (when the comparator needs one)
    /// using `op`. Mismatched tags always yield `false`, including
    /// int/float — authors must keep types consistent themselves.
    pub fn compare(&self, op: Comparator, other: Option<&SimpleValue>) -> bool {
        match op {
            Comparator::Truthy => self.is_truthy(),
            Comparator::NotTruthy => !self.is_truthy(),
            _ => {
                let Some(other) = other else { return false };
                same_type_compare(self, op, other)
            }
        }
    }
}

/// Whitelist-style same-tag comparison: explicit per-type match arms,
/// mismatched pairs fall through to a default.
fn same_type_compare(a: &SimpleValue, op: Comparator, b: &SimpleValue) -> bool {
    use SimpleValue::*;
    match (a, b) {
        (Bool(x), Bool(y)) => apply(op, x, y),
        (Int(x), Int(y)) => apply(op, x, y),
        (Float(x), Float(y)) => apply(op, x, y),
        (Str(x), Str(y)) => apply(op, x, y),
        _ => false,
    }
}

fn apply<T: PartialOrd + PartialEq>(op: Comparator, a: T, b: T) -> bool {
    match op {
        Comparator::Eq => a == b,
        Comparator::Ne => a != b,
        Comparator::Gt => a > b,
        Comparator::Lt => a < b,
        Comparator::Ge => a >= b,
        Comparator::Le => a <= b,
        Comparator::Truthy | Comparator::NotTruthy => unreachable!(),
    }
}

impl RValue {
    /// Succeeds iff not a variable reference or method call.
    pub fn cast_to_simple(&self) -> Option<SimpleValue> {
        match self {
            RValue::Bool(b) => Some(SimpleValue::Bool(*b)),
            RValue::Int(i) => Some(SimpleValue::Int(*i)),
            RValue::Float(f) => Some(SimpleValue::Float(*f)),
            RValue::Str(s) => Some(SimpleValue::Str(s.clone())),
            RValue::Variable(_) | RValue::MethodCall(_) => None,
        }
    }

    /// Authoring/debug form used only for diagnostics and logs (never part
    /// of the resolved, host-facing text).
    pub fn debug_form(&self) -> String {
        match self {
            RValue::Bool(b) => b.to_string(),
            RValue::Int(i) => i.to_string(),
            RValue::Float(f) => format!("{:.2}", f),
            RValue::Str(s) => s.to_string(),
            RValue::Variable(name) => name.to_string(),
            RValue::MethodCall(call) => call.debug_form(),
        }
    }
}

impl From<SimpleValue> for RValue {
    fn from(value: SimpleValue) -> Self {
        match value {
            SimpleValue::Bool(b) => RValue::Bool(b),
            SimpleValue::Int(i) => RValue::Int(i),
            SimpleValue::Float(f) => RValue::Float(f),
            SimpleValue::Str(s) => RValue::Str(s),
        }
    }
}

impl fmt::Display for SimpleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_rules() {
        assert!(SimpleValue::Bool(true).is_truthy());
        assert!(!SimpleValue::Bool(false).is_truthy());
        assert!(SimpleValue::Int(1).is_truthy());
        assert!(!SimpleValue::Int(0).is_truthy());
        assert!(SimpleValue::Float(0.5).is_truthy());
        assert!(!SimpleValue::Float(0.0).is_truthy());
        assert!(SimpleValue::Str("x".into()).is_truthy());
        assert!(!SimpleValue::Str("".into()).is_truthy());
    }

    #[test]
    fn mismatched_tags_never_compare_equal() {
        let int_val = SimpleValue::Int(1);
        let float_val = SimpleValue::Float(1.0);
        assert!(!int_val.compare(Comparator::Eq, Some(&float_val)));
        assert!(!int_val.compare(Comparator::Gt, Some(&float_val)));

        let str_val = SimpleValue::Str("1".into());
        assert!(!int_val.compare(Comparator::Eq, Some(&str_val)));
    }

    #[test]
    fn cast_to_simple_round_trips_literals() {
        for v in [
            SimpleValue::Bool(true),
            SimpleValue::Int(-7),
            SimpleValue::Float(3.5),
            SimpleValue::Str("hi".into()),
        ] {
            let r: RValue = v.clone().into();
            assert_eq!(r.cast_to_simple(), Some(v));
        }
    }

    #[test]
    fn variable_and_method_call_do_not_cast() {
        assert_eq!(RValue::Variable("x".into()).cast_to_simple(), None);
        let call = RValue::MethodCall(MethodCall::new("f", vec![]));
        assert_eq!(call.cast_to_simple(), None);
    }

    #[test]
    fn debug_float_is_fixed_precision() {
        assert_eq!(SimpleValue::Float(1.0 / 3.0).to_debug_string(), "0.33");
    }

    #[test]
    fn call_key_joins_canonical_args() {
        let call = MethodCall::new("is_admin", vec![]);
        assert_eq!(call.call_key(&[]), "is_admin");

        let call = MethodCall::new("add", vec![]);
        let args = [SimpleValue::Int(1), SimpleValue::Str("x".into())];
        assert_eq!(call.call_key(&args), "add|1|x");
    }
}
