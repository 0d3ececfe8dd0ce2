//! The typed intermediate representation the parser builds and the engine
//! walks: modules, blocks, beats, choices, conditionals, operations, text.
//!
//! Shape follows a tagged-sum `Expr`/`Statement`/`Program` style rather than
//! a class hierarchy — the variant set is closed and small.

use std::collections::HashMap;
use std::rc::Rc;

use crate::value::{Comparator, MethodCall, RValue, SimpleValue, Str};

/// `lvalue = rvalue`, `lvalue =!`, `lvalue += rvalue`, `lvalue -= rvalue`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MutationKind {
    Equate,
    Switch,
    Add,
    Subtract,
}

/// A single operation line: move, call, mutation, module transition, exit.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Move {
        target_tag: Str,
    },
    MethodCall(MethodCall),
    Mutation {
        lvalue: Str,
        kind: MutationKind,
        /// Absent only for `Mutation::Switch`, which needs no right-hand side.
        rvalue: Option<RValue>,
    },
    GoModule {
        module_path: Str,
        /// Empty string when the source line had no `-> TAG` suffix.
        start_tag: Str,
    },
    Exit {
        argument: Option<RValue>,
    },
}

/// A leaf of a `Conditional` tree: `left op right?`.
#[derive(Clone, Debug, PartialEq)]
pub struct Atom {
    pub left: RValue,
    pub op: Comparator,
    pub right: Option<RValue>,
}

/// `AND`/`OR`; mixed connectors at one level are forbidden by the grammar
/// (subclauses must parenthesize to switch mode).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClauseMode {
    And,
    Or,
}

/// An interior node or leaf of a conditional tree.
#[derive(Clone, Debug, PartialEq)]
pub enum ConditionalItem {
    Atom(Atom),
    Clause(Conditional),
}

/// `(mode, items)` — a clause; the tree root a beat/choice carries as its
/// `condition`.
#[derive(Clone, Debug, PartialEq)]
pub struct Conditional {
    pub mode: ClauseMode,
    pub items: Vec<ConditionalItem>,
}

/// One arm of a switch-style ternary insertion: either a literal match value
/// or the `_` default arm, which always succeeds as a fallback.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchArm {
    Value(RValue),
    Default,
}

/// One chunk of authored text.
#[derive(Clone, Debug, PartialEq)]
pub enum TextPart {
    Literal(Rc<str>),
    SimpleInsertion(RValue),
    /// `{x ? a : b}` (`check_truthy = true`, `arms[0]` truthy / `arms[1]`
    /// falsy, `MatchArm` on each is ignored) or `{x ? [m: v, ...]}`
    /// (`check_truthy = false`, matched linearly against `check`).
    TernaryInsertion {
        check: RValue,
        check_truthy: bool,
        arms: Vec<(MatchArm, RValue)>,
    },
}

/// An ordered sequence of text parts, authored inline with a beat or choice.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TextContent {
    pub parts: Vec<TextPart>,
}

impl TextContent {
    pub fn new(parts: Vec<TextPart>) -> Self {
        TextContent { parts }
    }

    /// Renders unresolved text content back to a source-like string
    /// (literal parts verbatim, insertions as `{name}`), for diagnostics
    /// and `Debug` output — never part of the resolved, host-facing text.
    pub fn debug_form(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                TextPart::Literal(s) => out.push_str(s),
                TextPart::SimpleInsertion(rv) => {
                    out.push('{');
                    out.push_str(&rv.debug_form());
                    out.push('}');
                }
                TextPart::TernaryInsertion { check, .. } => {
                    out.push('{');
                    out.push_str(&check.debug_form());
                    out.push_str(" ? ...}");
                }
            }
        }
        out
    }
}

/// A player-selectable branch attached to a beat's presentation.
#[derive(Clone, Debug, PartialEq)]
pub struct Choice {
    pub condition: Option<Conditional>,
    pub content: TextContent,
    pub operations: Vec<Operation>,
    pub line_number: u32,
}

/// A single authored unit: optional condition, optional attribution, text,
/// operations, zero-or-more choices.
#[derive(Clone, Debug, PartialEq)]
pub struct Beat {
    pub condition: Option<Conditional>,
    pub attribution: Str,
    pub content: TextContent,
    pub operations: Vec<Operation>,
    pub choices: Vec<Choice>,
    /// No text, never presented; runs only its operations.
    pub is_logic: bool,
    /// Runs iff the immediately preceding beat's condition evaluated false.
    pub is_else: bool,
    pub line_number: u32,
}

/// A named sequence of beats, reachable by tag.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub tag: Str,
    pub beats: Vec<Beat>,
}

/// `~ NAME = VALUE` (fresh) or `< NAME = VALUE` (imported).
#[derive(Clone, Debug, PartialEq)]
pub struct Declaration {
    pub name: Str,
    pub initial: SimpleValue,
    pub is_imported: bool,
}

/// `@testbed NAME ... @end` — an authoring aid; the engine ignores these at
/// runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct Testbed {
    pub name: Str,
    pub values: Vec<(Str, SimpleValue)>,
}

/// The parsed AST of one source file.
#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub filename: String,
    pub declarations: Vec<Declaration>,
    pub testbeds: Vec<Testbed>,
    pub blocks: Vec<Block>,
    block_lookup: HashMap<String, usize>,
}

impl Module {
    pub fn new(
        filename: String,
        declarations: Vec<Declaration>,
        testbeds: Vec<Testbed>,
        blocks: Vec<Block>,
    ) -> Self {
        let mut block_lookup = HashMap::with_capacity(blocks.len());
        for (index, block) in blocks.iter().enumerate() {
            // Duplicate tags: the last one wins. The parser is responsible
            // for emitting the matching warning.
            block_lookup.insert(block.tag.to_string(), index);
        }
        Module {
            filename,
            declarations,
            testbeds,
            blocks,
            block_lookup,
        }
    }

    /// Looks up a block's index by tag. The "first block" is index 0.
    pub fn block_index(&self, tag: &str) -> Option<usize> {
        self.block_lookup.get(tag).copied()
    }

    pub fn block(&self, tag: &str) -> Option<&Block> {
        self.block_index(tag).map(|i| &self.blocks[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(tag: &str) -> Block {
        Block {
            tag: tag.into(),
            beats: vec![],
        }
    }

    #[test]
    fn block_lookup_resolves_tags_to_index() {
        let module = Module::new(
            "m.ska".to_string(),
            vec![],
            vec![],
            vec![block("start"), block("next")],
        );
        assert_eq!(module.block_index("start"), Some(0));
        assert_eq!(module.block_index("next"), Some(1));
        assert_eq!(module.block_index("missing"), None);
    }

    #[test]
    fn duplicate_tags_last_one_wins() {
        let module = Module::new(
            "m.ska".to_string(),
            vec![],
            vec![],
            vec![block("start"), block("start")],
        );
        assert_eq!(module.block_index("start"), Some(1));
    }

    #[test]
    fn text_content_debug_form_renders_insertions() {
        let content = TextContent::new(vec![
            TextPart::Literal("Hello, ".into()),
            TextPart::SimpleInsertion(RValue::Variable("name".into())),
            TextPart::Literal("!".into()),
        ]);
        assert_eq!(content.debug_form(), "Hello, {name}!");
    }
}
