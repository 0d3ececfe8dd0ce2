//! Pure resolution of rvalues, conditionals, and text insertions against
//! engine state and the query-answer cache.
//!
//! A match-over-AST-variant dispatch table, the same shape as a small
//! expression evaluator, just resolving values instead of type-checking
//! them.

use crate::ast::{Atom, ClauseMode, Conditional, ConditionalItem, MatchArm, Operation, TextContent, TextPart};
use crate::state::EngineState;
use crate::value::{Comparator, MethodCall, RValue, SimpleValue};

/// Literal -> itself; variable -> state lookup or `false` if absent;
/// method-call -> cache lookup by call key, or `false` if absent. Nested
/// method calls inside the arguments are *not* dispatched here — by the
/// time this runs, the scheduler has already queried and cached them.
pub fn resolve_rvalue_to_simple(rvalue: &RValue, state: &EngineState) -> SimpleValue {
    match rvalue {
        RValue::Bool(b) => SimpleValue::Bool(*b),
        RValue::Int(i) => SimpleValue::Int(*i),
        RValue::Float(f) => SimpleValue::Float(*f),
        RValue::Str(s) => SimpleValue::Str(s.clone()),
        RValue::Variable(name) => state
            .get(name)
            .cloned()
            .unwrap_or(SimpleValue::Bool(false)),
        RValue::MethodCall(call) => {
            let args: Vec<SimpleValue> = call
                .args
                .iter()
                .map(|arg| resolve_rvalue_to_simple(arg, state))
                .collect();
            let key = call.call_key(&args);
            state
                .cached_answer(&key)
                .cloned()
                .unwrap_or(SimpleValue::Bool(false))
        }
    }
}

/// `truthy`/`not_truthy` apply `is_truthy` to the left side alone;
/// otherwise both sides are resolved and compared per the value model.
pub fn resolve_conditional_atom(atom: &Atom, state: &EngineState) -> bool {
    let left = resolve_rvalue_to_simple(&atom.left, state);
    match atom.op {
        Comparator::Truthy => left.is_truthy(),
        Comparator::NotTruthy => !left.is_truthy(),
        op => {
            let right = atom
                .right
                .as_ref()
                .map(|r| resolve_rvalue_to_simple(r, state));
            left.compare(op, right.as_ref())
        }
    }
}

fn resolve_conditional_item(item: &ConditionalItem, state: &EngineState) -> bool {
    match item {
        ConditionalItem::Atom(atom) => resolve_conditional_atom(atom, state),
        ConditionalItem::Clause(clause) => resolve_conditional(clause, state),
    }
}

/// Short-circuit evaluation: OR returns true on first true, AND returns
/// false on first false. `Iterator::all`/`any` give the correct vacuous
/// boundary for free: empty AND is true, empty OR is false.
pub fn resolve_conditional(conditional: &Conditional, state: &EngineState) -> bool {
    match conditional.mode {
        ClauseMode::And => conditional
            .items
            .iter()
            .all(|item| resolve_conditional_item(item, state)),
        ClauseMode::Or => conditional
            .items
            .iter()
            .any(|item| resolve_conditional_item(item, state)),
    }
}

/// Resolve then stringify with the canonical (full-precision) rules.
pub fn resolve_simple_insertion(rvalue: &RValue, state: &EngineState) -> String {
    resolve_rvalue_to_simple(rvalue, state).to_canonical_string()
}

/// `check_truthy`: pick `arms[0]` when truthy, else `arms[1]` (each arm's
/// `MatchArm` is ignored in this mode). Otherwise linearly match `check`
/// against each `MatchArm::Value`, falling back to the first
/// `MatchArm::Default` arm if none matched.
pub fn resolve_ternary_insertion(
    check: &RValue,
    check_truthy: bool,
    arms: &[(MatchArm, RValue)],
    state: &EngineState,
) -> String {
    if check_truthy {
        let index = usize::from(!resolve_rvalue_to_simple(check, state).is_truthy());
        return arms
            .get(index)
            .map(|(_, result)| resolve_simple_insertion(result, state))
            .unwrap_or_default();
    }

    let check_value = resolve_rvalue_to_simple(check, state);
    let mut default_result = None;
    for (arm, result) in arms {
        match arm {
            MatchArm::Value(candidate) => {
                let candidate_value = resolve_rvalue_to_simple(candidate, state);
                if check_value.compare(Comparator::Eq, Some(&candidate_value)) {
                    return resolve_simple_insertion(result, state);
                }
            }
            MatchArm::Default if default_result.is_none() => {
                default_result = Some(result);
            }
            MatchArm::Default => {}
        }
    }
    default_result
        .map(|result| resolve_simple_insertion(result, state))
        .unwrap_or_default()
}

/// Maps each text part to a resolved chunk; joining them is the host's
/// concern.
pub fn resolve_text(content: &TextContent, state: &EngineState) -> Vec<String> {
    content
        .parts
        .iter()
        .map(|part| match part {
            TextPart::Literal(s) => s.to_string(),
            TextPart::SimpleInsertion(rvalue) => resolve_simple_insertion(rvalue, state),
            TextPart::TernaryInsertion {
                check,
                check_truthy,
                arms,
            } => resolve_ternary_insertion(check, *check_truthy, arms, state),
        })
        .collect()
}

/// Collects the method calls that must be queried before `rvalue` can be
/// resolved, in call-dependency order: an argument's own nested calls
/// before the call that consumes them, left-to-right. Every call reached
/// this way has its
/// result consumed by something (an argument list, a comparison, a
/// mutation's rvalue, ...), so each is marked `expects_response = true`.
pub fn collect_calls_in_rvalue(rvalue: &RValue, out: &mut Vec<(MethodCall, bool)>) {
    if let RValue::MethodCall(call) = rvalue {
        for arg in &call.args {
            collect_calls_in_rvalue(arg, out);
        }
        out.push((call.clone(), true));
    }
}

/// Walks a conditional tree left-to-right, atom left-then-right, recursing
/// into nested clauses in source position, pre-order. Every call reached
/// from a conditional atom feeds a comparison, so each is consumed.
pub fn collect_calls_in_conditional(conditional: &Conditional, out: &mut Vec<(MethodCall, bool)>) {
    for item in &conditional.items {
        match item {
            ConditionalItem::Atom(atom) => {
                collect_calls_in_rvalue(&atom.left, out);
                if let Some(right) = &atom.right {
                    collect_calls_in_rvalue(right, out);
                }
            }
            ConditionalItem::Clause(clause) => collect_calls_in_conditional(clause, out),
        }
    }
}

/// Collects the method calls an operation's own fields reference (a direct
/// `MethodCall` operation, or one nested in a mutation's/exit's rvalue).
///
/// A bare `Operation::MethodCall` is a "fire and forget" call: the beat
/// text and choices don't consume its result, so it alone is marked
/// `expects_response = false` — nothing downstream needs its value. Its own
/// arguments are still consumed *by the call itself*, so they stay `true`.
pub fn collect_calls_in_operation(operation: &Operation, out: &mut Vec<(MethodCall, bool)>) {
    match operation {
        Operation::MethodCall(call) => {
            for arg in &call.args {
                collect_calls_in_rvalue(arg, out);
            }
            out.push((call.clone(), false));
        }
        Operation::Mutation {
            rvalue: Some(rvalue),
            ..
        } => collect_calls_in_rvalue(rvalue, out),
        Operation::Exit {
            argument: Some(argument),
        } => collect_calls_in_rvalue(argument, out),
        Operation::Mutation { rvalue: None, .. }
        | Operation::Exit { argument: None }
        | Operation::Move { .. }
        | Operation::GoModule { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(left: RValue, op: Comparator, right: Option<RValue>) -> ConditionalItem {
        ConditionalItem::Atom(Atom { left, op, right })
    }

    #[test]
    fn variable_absent_resolves_false() {
        let state = EngineState::new();
        let v = resolve_rvalue_to_simple(&RValue::Variable("missing".into()), &state);
        assert_eq!(v, SimpleValue::Bool(false));
    }

    #[test]
    fn method_call_resolves_from_cache_by_call_key() {
        let mut state = EngineState::new();
        let call = MethodCall::new("is_admin", vec![]);
        state.cache_answer(call.call_key(&[]), Some(SimpleValue::Bool(true)));
        let v = resolve_rvalue_to_simple(&RValue::MethodCall(call), &state);
        assert_eq!(v, SimpleValue::Bool(true));
    }

    #[test]
    fn empty_and_is_true_empty_or_is_false() {
        let state = EngineState::new();
        let and_clause = Conditional {
            mode: ClauseMode::And,
            items: vec![],
        };
        let or_clause = Conditional {
            mode: ClauseMode::Or,
            items: vec![],
        };
        assert!(resolve_conditional(&and_clause, &state));
        assert!(!resolve_conditional(&or_clause, &state));
    }

    #[test]
    fn or_short_circuits_on_first_true() {
        let state = EngineState::new();
        let clause = Conditional {
            mode: ClauseMode::Or,
            items: vec![
                atom(RValue::Bool(false), Comparator::Truthy, None),
                atom(RValue::Bool(true), Comparator::Truthy, None),
            ],
        };
        assert!(resolve_conditional(&clause, &state));
    }

    #[test]
    fn ternary_truthy_picks_branch_by_index() {
        let state = EngineState::new();
        let arms = vec![
            (MatchArm::Default, RValue::Str("yes".into())),
            (MatchArm::Default, RValue::Str("no".into())),
        ];
        assert_eq!(
            resolve_ternary_insertion(&RValue::Bool(true), true, &arms, &state),
            "yes"
        );
        assert_eq!(
            resolve_ternary_insertion(&RValue::Bool(false), true, &arms, &state),
            "no"
        );
    }

    #[test]
    fn ternary_switch_falls_back_to_default_arm() {
        let state = EngineState::new();
        let arms = vec![
            (MatchArm::Value(RValue::Int(1)), RValue::Str("one".into())),
            (MatchArm::Default, RValue::Str("other".into())),
        ];
        assert_eq!(
            resolve_ternary_insertion(&RValue::Int(2), false, &arms, &state),
            "other"
        );
        assert_eq!(
            resolve_ternary_insertion(&RValue::Int(1), false, &arms, &state),
            "one"
        );
    }

    #[test]
    fn collect_calls_visits_nested_args_before_outer_call() {
        let inner = MethodCall::new("inner", vec![]);
        let outer = MethodCall::new("outer", vec![RValue::MethodCall(inner.clone())]);
        let mut out = Vec::new();
        collect_calls_in_rvalue(&RValue::MethodCall(outer.clone()), &mut out);
        assert_eq!(out, vec![(inner, true), (outer, true)]);
    }

    #[test]
    fn standalone_operation_call_does_not_expect_a_response() {
        let inner = MethodCall::new("inner", vec![]);
        let outer = Operation::MethodCall(MethodCall::new(
            "notify",
            vec![RValue::MethodCall(inner.clone())],
        ));
        let mut out = Vec::new();
        collect_calls_in_operation(&outer, &mut out);
        let Operation::MethodCall(outer_call) = &outer else {
            unreachable!()
        };
        assert_eq!(out, vec![(inner, true), (outer_call.clone(), false)]);
    }
}
