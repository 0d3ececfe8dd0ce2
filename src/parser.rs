//! The parse driver: walks source lines and the expression tokens within
//! them, maintaining a handful of parse-time stacks (rvalue buffer,
//! argument queue, conditional stack, choice stack, operation queue, text
//! queue) to assemble a `Module`.
//!
//! Hand-rolled recursive-descent over lines and tokens rather than a
//! generated grammar, so a malformed line can be skipped with a warning and
//! parsing resumed at the next line — tolerant recovery an LR-generated
//! parser can't do.

use log::warn;

use crate::ast::{
    Atom, Beat, Block, ClauseMode, Choice, Conditional, ConditionalItem, Declaration, MatchArm,
    Module, MutationKind, Operation, Testbed, TextContent, TextPart,
};
use crate::diagnostics::Diagnostic;
use crate::lexer::{split_lines, tokenize_expr, SourceLine, Token};
use crate::value::{Comparator, MethodCall, RValue, SimpleValue, Str};

/// Parses `source` into a `Module` plus any diagnostics recorded along the
/// way.
pub fn parse(source: &str, filename: impl Into<String>) -> (Module, Vec<Diagnostic>) {
    let lines = split_lines(source);
    let mut parser = Parser {
        diagnostics: Vec::new(),
        declarations: Vec::new(),
        testbeds: Vec::new(),
        blocks: Vec::new(),
        block_headers: Vec::new(),
        tag_to_index: std::collections::HashMap::new(),
        current_block_index: None,
    };
    parser.run(&lines);
    parser.check_duplicate_tags();
    let module = Module::new(filename.into(), parser.declarations, parser.testbeds, parser.blocks);
    let mut diagnostics = parser.diagnostics;
    check_unused_declarations(&module, &mut diagnostics);
    (module, diagnostics)
}

struct Parser {
    diagnostics: Vec<Diagnostic>,
    declarations: Vec<Declaration>,
    testbeds: Vec<Testbed>,
    blocks: Vec<Block>,
    /// `(tag, line_number)` per block header encountered, in source order;
    /// tracked alongside `blocks` (which only keeps the last-wins survivor)
    /// so duplicate tags can still be diagnosed.
    block_headers: Vec<(Str, u32)>,
    /// tag -> index into `blocks`, so a re-declared `#TAG` overwrites the
    /// block already sitting at its original position instead of appending
    /// a second entry with the same tag.
    tag_to_index: std::collections::HashMap<String, usize>,
    /// Index into `blocks` that subsequent beat lines attach to; `None`
    /// before the first block header is seen.
    current_block_index: Option<usize>,
}

impl Parser {
    fn diag_error(&mut self, line: u32, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(line, message));
    }

    fn diag_warning(&mut self, line: u32, message: impl Into<String>) {
        let message = message.into();
        warn!("line {line}: {message}");
        self.diagnostics.push(Diagnostic::warning(line, message));
    }

    /// Duplicate block tags: the last one wins at parse time (`ast::Module`
    /// already overwrites earlier entries in its tag lookup), but every
    /// occurrence after the first gets a warning.
    fn check_duplicate_tags(&mut self) {
        let mut seen: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
        let mut dupes = Vec::new();
        for (tag, line) in &self.block_headers {
            if let Some(first_line) = seen.get(tag.as_ref()) {
                dupes.push((*line, tag.to_string(), *first_line));
            } else {
                seen.insert(tag.as_ref(), *line);
            }
        }
        for (line, tag, first_line) in dupes {
            self.diag_warning(
                line,
                format!("duplicate block tag '{tag}' (first defined on line {first_line}); the last definition wins"),
            );
        }
    }

    fn run(&mut self, lines: &[SourceLine]) {
        let mut i = 0;
        let mut in_testbed: Option<(Str, Vec<(Str, SimpleValue)>)> = None;
        let mut seen_block = false;

        while i < lines.len() {
            let line = &lines[i];
            if line.text.is_empty() {
                i += 1;
                continue;
            }

            if let Some((name, values)) = in_testbed.as_mut() {
                if line.text == "@end" {
                    self.testbeds.push(Testbed {
                        name: name.clone(),
                        values: std::mem::take(values),
                    });
                    in_testbed = None;
                } else if let Some(entry) = parse_name_value(&line.text) {
                    values.push(entry);
                } else {
                    self.diag_warning(line.number, "skipped malformed testbed entry");
                }
                i += 1;
                continue;
            }

            if let Some(name) = line.text.strip_prefix("@testbed") {
                in_testbed = Some((name.trim().into(), Vec::new()));
                i += 1;
                continue;
            }

            if !seen_block
                && line.indent == 0
                && (line.text.starts_with('~') || line.text.starts_with('<'))
            {
                self.parse_declaration(line);
                i += 1;
                continue;
            }

            if let Some(tag) = line.text.strip_prefix('#') {
                seen_block = true;
                let tag: Str = tag.trim().into();
                self.block_headers.push((tag.clone(), line.number));
                // Re-declaring a tag replaces the block already sitting at
                // its original position; the last definition wins but the
                // slot (and thus `Module::block_index`) stays put.
                match self.tag_to_index.get(tag.as_ref()) {
                    Some(&index) => {
                        self.blocks[index] = Block {
                            tag,
                            beats: Vec::new(),
                        };
                        self.current_block_index = Some(index);
                    }
                    None => {
                        let index = self.blocks.len();
                        self.tag_to_index.insert(tag.to_string(), index);
                        self.blocks.push(Block {
                            tag,
                            beats: Vec::new(),
                        });
                        self.current_block_index = Some(index);
                    }
                }
                i += 1;
                continue;
            }

            if !seen_block {
                self.diag_warning(line.number, "skipped line before the first block header");
                i += 1;
                continue;
            }

            if line.indent != 0 {
                self.diag_warning(line.number, "skipped orphaned indented line");
                i += 1;
                continue;
            }

            let mut beat = if line.text.starts_with('*') {
                self.parse_logic_line(line)
            } else {
                self.parse_beat_line(line)
            };
            i += 1;
            let body_start = i;
            while i < lines.len() && lines[i].indent > 0 {
                i += 1;
            }
            self.attach_beat_body(&mut beat, &lines[body_start..i]);
            let current = self
                .current_block_index
                .expect("seen_block is true, so a block was already pushed");
            self.blocks[current].beats.push(beat);
        }

        if let Some((name, _)) = in_testbed {
            let last_line = lines.last().map(|l| l.number).unwrap_or(0);
            self.diag_error(last_line, format!("unterminated testbed '{name}'"));
        }
    }

    fn parse_declaration(&mut self, line: &SourceLine) {
        let (is_imported, rest) = if let Some(r) = line.text.strip_prefix('<') {
            (true, r)
        } else if let Some(r) = line.text.strip_prefix('~') {
            (false, r)
        } else {
            return;
        };
        let rest = rest.trim_start();
        let Some((name, after)) = split_identifier(rest) else {
            self.diag_error(line.number, "malformed declaration: expected a name");
            return;
        };
        let Some(value_src) = after.trim_start().strip_prefix('=') else {
            self.diag_error(line.number, "malformed declaration: expected '='");
            return;
        };
        match parse_simple_value_literal(value_src.trim()) {
            Ok(initial) => self.declarations.push(Declaration {
                name: name.into(),
                initial,
                is_imported,
            }),
            Err(e) => self.diag_error(line.number, format!("bad declaration value: {e}")),
        }
    }

    /// Optional `(? COND)`, optional `ATTR:`, then text content.
    fn parse_beat_line(&mut self, line: &SourceLine) -> Beat {
        let mut rest = line.text.as_str();
        let condition = self.take_condition_prefix(line.number, &mut rest);

        let mut attribution: Str = "".into();
        if let Some(colon) = find_attribution_colon(rest) {
            attribution = rest[..colon].trim().into();
            rest = rest[colon + 1..].trim_start();
        }

        let content = self.parse_text_content(line.number, rest);
        Beat {
            condition,
            attribution,
            content,
            operations: Vec::new(),
            choices: Vec::new(),
            is_logic: false,
            is_else: false,
            line_number: line.number,
        }
    }

    /// `*`, then optional `(? COND)` or `(else)`, then either an inline
    /// operation or nothing (operations attach from the indented body).
    fn parse_logic_line(&mut self, line: &SourceLine) -> Beat {
        let mut rest = line.text.trim_start_matches('*').trim_start();
        let mut is_else = false;
        let mut condition = None;
        if let Some(after) = rest.strip_prefix("(else)") {
            is_else = true;
            rest = after.trim_start();
        } else {
            condition = self.take_condition_prefix(line.number, &mut rest);
        }

        let mut operations = Vec::new();
        if !rest.trim().is_empty() {
            if let Some(op) = self.parse_operation_text(line.number, rest.trim()) {
                operations.push(op);
            }
        }

        Beat {
            condition,
            attribution: "".into(),
            content: TextContent::default(),
            operations,
            choices: Vec::new(),
            is_logic: true,
            is_else,
            line_number: line.number,
        }
    }

    /// `>`, optional `(? COND)`, text, optional inline `-> TAG`, optional
    /// trailing `(? COND)` after the target tag (the seed scenarios write the
    /// condition after the move rather than before the choice text).
    fn parse_choice_line(&mut self, line: &SourceLine) -> Choice {
        let mut rest = line.text.trim_start_matches('>').trim_start();
        let mut condition = self.take_condition_prefix(line.number, &mut rest);

        let mut operations = Vec::new();
        let mut text_part = rest;
        if let Some(arrow_idx) = rest.rfind("->") {
            let after_arrow = rest[arrow_idx + 2..].trim();
            let (tag, trailing_condition) =
                self.take_trailing_condition(line.number, after_arrow);
            if condition.is_none() {
                condition = trailing_condition;
            }
            operations.push(Operation::Move {
                target_tag: tag.into(),
            });
            text_part = rest[..arrow_idx].trim_end();
        }

        let content = self.parse_text_content(line.number, text_part);
        Choice {
            condition,
            content,
            operations,
            line_number: line.number,
        }
    }

    /// Splits a `TAG (? COND)` fragment — the text following an inline
    /// `-> ` move — into its bare tag and an optional condition, so a choice
    /// line can carry its guard after the target instead of before the text.
    fn take_trailing_condition<'a>(
        &mut self,
        line_no: u32,
        s: &'a str,
    ) -> (&'a str, Option<Conditional>) {
        let Some(paren_idx) = s.find("(?") else {
            return (s.trim(), None);
        };
        let tag = s[..paren_idx].trim();
        let mut rest = &s[paren_idx..];
        let condition = self.take_condition_prefix(line_no, &mut rest);
        (tag, condition)
    }

    /// Strips a leading `(? CLAUSE)` from `rest`, returning the parsed
    /// `Conditional` and advancing `rest` past it. Absent entirely if
    /// there's no such prefix.
    fn take_condition_prefix(&mut self, line_no: u32, rest: &mut &str) -> Option<Conditional> {
        let stripped = rest.strip_prefix("(?")?;
        let close = find_matching_paren(stripped)?;
        let result = match parse_conditional(&stripped[..close]) {
            Ok(c) => Some(c),
            Err(e) => {
                self.diag_error(line_no, format!("bad condition: {e}"));
                None
            }
        };
        *rest = stripped[close + 1..].trim_start();
        result
    }

    /// Distributes a beat's indented body lines between the beat's own
    /// operation queue and each choice's operation queue, per indentation
    /// nesting.
    fn attach_beat_body(&mut self, beat: &mut Beat, body: &[SourceLine]) {
        let mut choice_indent = None;
        let mut current_choice: Option<Choice> = None;

        for line in body {
            if line.text.is_empty() {
                continue;
            }
            if line.text.starts_with('>') {
                if let Some(choice) = current_choice.take() {
                    beat.choices.push(choice);
                }
                choice_indent = Some(line.indent);
                current_choice = Some(self.parse_choice_line(line));
                continue;
            }

            let belongs_to_choice = choice_indent.is_some_and(|ci| line.indent > ci);
            if belongs_to_choice {
                if let Some(op) = self.parse_operation_text(line.number, line.text.trim()) {
                    current_choice.as_mut().unwrap().operations.push(op);
                }
            } else if let Some(op) = self.parse_operation_text(line.number, line.text.trim()) {
                beat.operations.push(op);
            }
        }
        if let Some(choice) = current_choice.take() {
            beat.choices.push(choice);
        }
    }

    fn parse_operation_text(&mut self, line_no: u32, text: &str) -> Option<Operation> {
        if let Some(tag) = text.strip_prefix("->") {
            return Some(Operation::Move {
                target_tag: tag.trim().into(),
            });
        }
        if let Some(rest) = text.strip_prefix(':') {
            return match self.parse_rvalue_text(line_no, rest.trim()) {
                Some(RValue::MethodCall(call)) => Some(Operation::MethodCall(call)),
                Some(_) => {
                    self.diag_error(line_no, "expected a method call after ':'");
                    None
                }
                None => None,
            };
        }
        if let Some(rest) = text.strip_prefix('~') {
            return self.parse_mutation(line_no, rest.trim_start());
        }
        if let Some(rest) = text.strip_prefix("GO") {
            let rest = rest.trim_start();
            let (path, start_tag) = match rest.find("->") {
                Some(arrow) => (rest[..arrow].trim(), rest[arrow + 2..].trim()),
                // A `GO` line without a `-> TAG` suffix defaults start_tag
                // to empty.
                None => (rest, ""),
            };
            return Some(Operation::GoModule {
                module_path: path.into(),
                start_tag: start_tag.into(),
            });
        }
        if let Some(rest) = text.strip_prefix("EXIT") {
            let rest = rest.trim();
            let argument = if rest.is_empty() {
                None
            } else {
                self.parse_rvalue_text(line_no, rest)
            };
            return Some(Operation::Exit { argument });
        }
        self.diag_warning(line_no, format!("skipped unrecognized line: {text}"));
        None
    }

    /// Snapshots the mutation target identifier before the rvalue parse
    /// consumes the rest of the line.
    fn parse_mutation(&mut self, line_no: u32, rest: &str) -> Option<Operation> {
        let Some((name, after)) = split_identifier(rest) else {
            self.diag_error(line_no, "malformed mutation: expected a variable name");
            return None;
        };
        let after = after.trim_start();
        if let Some(trailing) = after.strip_prefix("=!") {
            if !trailing.trim().is_empty() {
                self.diag_warning(line_no, "trailing text after '=!' ignored");
            }
            return Some(Operation::Mutation {
                lvalue: name.into(),
                kind: MutationKind::Switch,
                rvalue: None,
            });
        }
        if let Some(value_src) = after.strip_prefix("+=") {
            return self
                .parse_rvalue_text(line_no, value_src.trim())
                .map(|rv| Operation::Mutation {
                    lvalue: name.into(),
                    kind: MutationKind::Add,
                    rvalue: Some(rv),
                });
        }
        if let Some(value_src) = after.strip_prefix("-=") {
            return self
                .parse_rvalue_text(line_no, value_src.trim())
                .map(|rv| Operation::Mutation {
                    lvalue: name.into(),
                    kind: MutationKind::Subtract,
                    rvalue: Some(rv),
                });
        }
        if let Some(value_src) = after.strip_prefix('=') {
            return self
                .parse_rvalue_text(line_no, value_src.trim())
                .map(|rv| Operation::Mutation {
                    lvalue: name.into(),
                    kind: MutationKind::Equate,
                    rvalue: Some(rv),
                });
        }
        self.diag_error(line_no, format!("malformed mutation: {rest}"));
        None
    }

    fn parse_rvalue_text(&mut self, line_no: u32, s: &str) -> Option<RValue> {
        match tokenize_expr(s).and_then(|tokens| {
            let mut pos = 0;
            let rv = parse_rvalue(&tokens, &mut pos)?;
            if pos != tokens.len() {
                return Err("trailing tokens after value".to_string());
            }
            Ok(rv)
        }) {
            Ok(rv) => Some(rv),
            Err(e) => {
                self.diag_error(line_no, e);
                None
            }
        }
    }

    /// Coalesces literal runs and parses `{ ... }` insertions, matching the
    /// original's beat-part text queue (`parse_state.h::add_beat_string`).
    fn parse_text_content(&mut self, line_no: u32, s: &str) -> TextContent {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let chars: Vec<char> = s.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '{' {
                if !literal.is_empty() {
                    parts.push(TextPart::Literal(dedup_spaces(&literal).into()));
                    literal.clear();
                }
                match find_matching_brace(&chars, i) {
                    Some(close) => {
                        let inner: String = chars[i + 1..close].iter().collect();
                        match parse_injectable(&inner) {
                            Ok(part) => parts.push(part),
                            Err(e) => self.diag_error(line_no, format!("bad insertion: {e}")),
                        }
                        i = close + 1;
                        continue;
                    }
                    None => {
                        self.diag_error(line_no, "unterminated '{' insertion");
                        literal.push(chars[i]);
                        i += 1;
                        continue;
                    }
                }
            }
            literal.push(chars[i]);
            i += 1;
        }
        if !literal.is_empty() {
            parts.push(TextPart::Literal(dedup_spaces(&literal).into()));
        }
        TextContent::new(parts)
    }
}

fn find_attribution_colon(s: &str) -> Option<usize> {
    for (i, c) in s.char_indices() {
        match c {
            '{' => return None,
            ':' => return Some(i),
            _ => {}
        }
    }
    None
}

fn find_matching_brace(chars: &[char], start: usize) -> Option<usize> {
    chars[start + 1..]
        .iter()
        .position(|&c| c == '}')
        .map(|p| start + 1 + p)
}

/// Finds the index of the `)` that closes the condition opened by the
/// caller's `(?`, accounting for nested parens from subclauses and method
/// calls (e.g. `is_admin()) rest` — the naive first-`)` would stop at the
/// call's own closing paren instead of the condition's).
fn find_matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

fn dedup_spaces(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.chars() {
        if c == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }
        out.push(c);
    }
    out
}

fn split_identifier(s: &str) -> Option<(&str, &str)> {
    let end = s
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    if end == 0 {
        None
    } else {
        Some((&s[..end], &s[end..]))
    }
}

fn parse_name_value(s: &str) -> Option<(Str, SimpleValue)> {
    let (name, rest) = split_identifier(s.trim_start())?;
    let rest = rest.trim_start().strip_prefix('=')?;
    parse_simple_value_literal(rest.trim())
        .ok()
        .map(|v| (name.into(), v))
}

fn parse_simple_value_literal(s: &str) -> Result<SimpleValue, String> {
    let tokens = tokenize_expr(s)?;
    if tokens.len() != 1 {
        return Err("expected a single literal value".to_string());
    }
    match &tokens[0] {
        Token::Str(v) => Ok(SimpleValue::Str(v.as_str().into())),
        Token::Int(n) => Ok(SimpleValue::Int(*n)),
        Token::Float(f) => Ok(SimpleValue::Float(*f)),
        Token::Bool(b) => Ok(SimpleValue::Bool(*b)),
        other => Err(format!("{other:?} is not a literal value")),
    }
}

fn parse_rvalue(tokens: &[Token], pos: &mut usize) -> Result<RValue, String> {
    let tok = tokens.get(*pos).cloned().ok_or("expected a value")?;
    *pos += 1;
    match tok {
        Token::Str(s) => Ok(RValue::Str(s.as_str().into())),
        Token::Int(n) => Ok(RValue::Int(n)),
        Token::Float(f) => Ok(RValue::Float(f)),
        Token::Bool(b) => Ok(RValue::Bool(b)),
        Token::Ident(name) => {
            if matches!(tokens.get(*pos), Some(Token::LParen)) {
                *pos += 1;
                let mut args = Vec::new();
                if !matches!(tokens.get(*pos), Some(Token::RParen)) {
                    loop {
                        args.push(parse_rvalue(tokens, pos)?);
                        match tokens.get(*pos) {
                            Some(Token::Comma) => *pos += 1,
                            Some(Token::RParen) => break,
                            _ => return Err("expected ',' or ')' in argument list".to_string()),
                        }
                    }
                }
                expect(tokens, pos, &Token::RParen)?;
                Ok(RValue::MethodCall(MethodCall::new(name, args)))
            } else {
                Ok(RValue::Variable(name.as_str().into()))
            }
        }
        other => Err(format!("unexpected token {other:?} where a value was expected")),
    }
}

fn expect(tokens: &[Token], pos: &mut usize, want: &Token) -> Result<(), String> {
    if tokens.get(*pos) == Some(want) {
        *pos += 1;
        Ok(())
    } else {
        Err(format!("expected {want:?}"))
    }
}

/// `ATOM ( (and|or) ATOM )*`; `stop` bounds a nested clause at its closing
/// paren, `None` means "run to end of input" for the top-level clause.
fn parse_clause(
    tokens: &[Token],
    pos: &mut usize,
    stop: Option<&Token>,
) -> Result<Conditional, String> {
    let mut items = Vec::new();
    let mut mode = None;
    loop {
        let negate = matches!(tokens.get(*pos), Some(Token::Bang));
        if negate {
            *pos += 1;
        }
        let item = if matches!(tokens.get(*pos), Some(Token::LParen)) {
            *pos += 1;
            let sub = parse_clause(tokens, pos, Some(&Token::RParen))?;
            expect(tokens, pos, &Token::RParen)?;
            ConditionalItem::Clause(sub)
        } else {
            let left = parse_rvalue(tokens, pos)?;
            let comparator = match tokens.get(*pos) {
                Some(Token::Eq) => Some(Comparator::Eq),
                Some(Token::Ne) => Some(Comparator::Ne),
                Some(Token::Gt) => Some(Comparator::Gt),
                Some(Token::Lt) => Some(Comparator::Lt),
                Some(Token::Ge) => Some(Comparator::Ge),
                Some(Token::Le) => Some(Comparator::Le),
                _ => None,
            };
            let (op, right) = match comparator {
                Some(op) => {
                    *pos += 1;
                    (op, Some(parse_rvalue(tokens, pos)?))
                }
                None => (
                    if negate {
                        Comparator::NotTruthy
                    } else {
                        Comparator::Truthy
                    },
                    None,
                ),
            };
            ConditionalItem::Atom(Atom { left, op, right })
        };
        items.push(item);

        match tokens.get(*pos) {
            Some(Token::And) => {
                match mode {
                    None => mode = Some(ClauseMode::And),
                    Some(ClauseMode::And) => {}
                    Some(ClauseMode::Or) => {
                        return Err(
                            "cannot mix 'and' and 'or' at the same clause level; parenthesize the subclause".to_string(),
                        )
                    }
                }
                *pos += 1;
            }
            Some(Token::Or) => {
                match mode {
                    None => mode = Some(ClauseMode::Or),
                    Some(ClauseMode::Or) => {}
                    Some(ClauseMode::And) => {
                        return Err(
                            "cannot mix 'and' and 'or' at the same clause level; parenthesize the subclause".to_string(),
                        )
                    }
                }
                *pos += 1;
            }
            Some(t) if Some(t) == stop => break,
            None if stop.is_none() => break,
            other => return Err(format!("unexpected token {other:?} in conditional")),
        }
    }
    Ok(Conditional {
        mode: mode.unwrap_or(ClauseMode::And),
        items,
    })
}

fn parse_conditional(expr: &str) -> Result<Conditional, String> {
    let tokens = tokenize_expr(expr)?;
    let mut pos = 0;
    let clause = parse_clause(&tokens, &mut pos, None)?;
    if pos != tokens.len() {
        return Err("trailing tokens in conditional".to_string());
    }
    Ok(clause)
}

/// `RVAL` alone, `RVAL ? A : B` (truthy ternary), or
/// `RVAL ? [ MATCH : VAL, ... ]` (switch ternary, `_` as default match).
fn parse_injectable(inner: &str) -> Result<TextPart, String> {
    let tokens = tokenize_expr(inner)?;
    let mut pos = 0;
    let check = parse_rvalue(&tokens, &mut pos)?;
    if pos >= tokens.len() {
        return Ok(TextPart::SimpleInsertion(check));
    }
    expect(&tokens, &mut pos, &Token::Question)?;

    if matches!(tokens.get(pos), Some(Token::LBracket)) {
        pos += 1;
        let mut arms = Vec::new();
        loop {
            if matches!(tokens.get(pos), Some(Token::RBracket)) {
                pos += 1;
                break;
            }
            let arm = if matches!(tokens.get(pos), Some(Token::Underscore)) {
                pos += 1;
                MatchArm::Default
            } else {
                MatchArm::Value(parse_rvalue(&tokens, &mut pos)?)
            };
            expect(&tokens, &mut pos, &Token::Colon)?;
            let result = parse_rvalue(&tokens, &mut pos)?;
            arms.push((arm, result));
            match tokens.get(pos) {
                Some(Token::Comma) => pos += 1,
                Some(Token::RBracket) => {
                    pos += 1;
                    break;
                }
                other => return Err(format!("expected ',' or ']', got {other:?}")),
            }
        }
        Ok(TextPart::TernaryInsertion {
            check,
            check_truthy: false,
            arms,
        })
    } else {
        let truthy_branch = parse_rvalue(&tokens, &mut pos)?;
        expect(&tokens, &mut pos, &Token::Colon)?;
        let falsy_branch = parse_rvalue(&tokens, &mut pos)?;
        Ok(TextPart::TernaryInsertion {
            check,
            check_truthy: true,
            arms: vec![
                (MatchArm::Default, truthy_branch),
                (MatchArm::Default, falsy_branch),
            ],
        })
    }
}

/// Emits a warning for every declared variable that is never referenced
/// anywhere in the module's blocks — neither read (a `RValue::Variable`) nor
/// written (a mutation's lvalue). Declarations exist to seed state a script
/// will use; one that's never touched again is almost always a typo or a
/// leftover from an edit.
fn check_unused_declarations(module: &Module, diagnostics: &mut Vec<Diagnostic>) {
    let mut used: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for block in &module.blocks {
        for beat in &block.beats {
            if let Some(cond) = &beat.condition {
                collect_vars_in_conditional(cond, &mut used);
            }
            collect_vars_in_text(&beat.content, &mut used);
            for op in &beat.operations {
                collect_vars_in_operation(op, &mut used);
            }
            for choice in &beat.choices {
                if let Some(cond) = &choice.condition {
                    collect_vars_in_conditional(cond, &mut used);
                }
                collect_vars_in_text(&choice.content, &mut used);
                for op in &choice.operations {
                    collect_vars_in_operation(op, &mut used);
                }
            }
        }
    }
    for decl in &module.declarations {
        if !used.contains(decl.name.as_ref()) {
            let message = format!("declared variable '{}' is never referenced", decl.name);
            warn!("{message}");
            diagnostics.push(Diagnostic::warning(0, message));
        }
    }
}

fn collect_vars_in_rvalue<'a>(rvalue: &'a RValue, out: &mut std::collections::HashSet<&'a str>) {
    match rvalue {
        RValue::Variable(name) => {
            out.insert(name.as_ref());
        }
        RValue::MethodCall(call) => {
            for arg in &call.args {
                collect_vars_in_rvalue(arg, out);
            }
        }
        RValue::Bool(_) | RValue::Int(_) | RValue::Float(_) | RValue::Str(_) => {}
    }
}

fn collect_vars_in_conditional<'a>(
    conditional: &'a Conditional,
    out: &mut std::collections::HashSet<&'a str>,
) {
    for item in &conditional.items {
        match item {
            ConditionalItem::Atom(atom) => {
                collect_vars_in_rvalue(&atom.left, out);
                if let Some(right) = &atom.right {
                    collect_vars_in_rvalue(right, out);
                }
            }
            ConditionalItem::Clause(clause) => collect_vars_in_conditional(clause, out),
        }
    }
}

fn collect_vars_in_text<'a>(content: &'a TextContent, out: &mut std::collections::HashSet<&'a str>) {
    for part in &content.parts {
        match part {
            TextPart::Literal(_) => {}
            TextPart::SimpleInsertion(rvalue) => collect_vars_in_rvalue(rvalue, out),
            TextPart::TernaryInsertion { check, arms, .. } => {
                collect_vars_in_rvalue(check, out);
                for (arm, result) in arms {
                    if let MatchArm::Value(v) = arm {
                        collect_vars_in_rvalue(v, out);
                    }
                    collect_vars_in_rvalue(result, out);
                }
            }
        }
    }
}

fn collect_vars_in_operation<'a>(operation: &'a Operation, out: &mut std::collections::HashSet<&'a str>) {
    match operation {
        Operation::Move { .. } | Operation::GoModule { .. } => {}
        Operation::MethodCall(call) => {
            for arg in &call.args {
                collect_vars_in_rvalue(arg, out);
            }
        }
        Operation::Mutation { lvalue, rvalue, .. } => {
            out.insert(lvalue.as_ref());
            if let Some(rvalue) = rvalue {
                collect_vars_in_rvalue(rvalue, out);
            }
        }
        Operation::Exit { argument } => {
            if let Some(argument) = argument {
                collect_vars_in_rvalue(argument, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_linear_module() {
        let (module, diagnostics) = parse("#start\nHello, world.\n", "m.ska");
        assert!(diagnostics.is_empty());
        assert_eq!(module.blocks.len(), 1);
        assert_eq!(module.blocks[0].tag.as_ref(), "start");
        assert_eq!(module.blocks[0].beats.len(), 1);
        let beat = &module.blocks[0].beats[0];
        assert_eq!(beat.content.parts, vec![TextPart::Literal("Hello, world.".into())]);
    }

    #[test]
    fn declaration_and_variable_interpolation() {
        let (module, _) = parse("~ name = \"world\"\n#start\nHello, {name}!\n", "m.ska");
        assert_eq!(module.declarations.len(), 1);
        assert_eq!(module.declarations[0].name.as_ref(), "name");
        assert_eq!(
            module.declarations[0].initial,
            SimpleValue::Str("world".into())
        );
        let beat = &module.blocks[0].beats[0];
        assert_eq!(
            beat.content.parts,
            vec![
                TextPart::Literal("Hello, ".into()),
                TextPart::SimpleInsertion(RValue::Variable("name".into())),
                TextPart::Literal("!".into()),
            ]
        );
    }

    #[test]
    fn beat_condition_parses_as_atom() {
        let (module, _) = parse("~ debug = false\n#start\n(? debug) Debug message.\n", "m.ska");
        let beat = &module.blocks[0].beats[0];
        let cond = beat.condition.as_ref().unwrap();
        assert_eq!(cond.mode, ClauseMode::And);
        assert_eq!(
            cond.items,
            vec![ConditionalItem::Atom(Atom {
                left: RValue::Variable("debug".into()),
                op: Comparator::Truthy,
                right: None,
            })]
        );
    }

    #[test]
    fn choice_with_condition_and_inline_move() {
        let source = "~ gold = 0\n#start\nYou approach the vendor.\n  > Buy sword -> buy (? gold >= 10)\n  > Leave -> leave\n";
        let (module, _) = parse(source, "m.ska");
        let beat = &module.blocks[0].beats[0];
        assert_eq!(beat.choices.len(), 2);
        assert_eq!(
            beat.choices[0].operations,
            vec![Operation::Move {
                target_tag: "buy".into()
            }]
        );
        assert!(beat.choices[0].condition.is_some());
        assert!(beat.choices[1].condition.is_none());
    }

    #[test]
    fn switch_mutation_parses_with_no_rvalue() {
        let source = "~ flag = false\n#start\n* \n  ~ flag =!\n#next\n{flag}\n";
        let (module, diagnostics) = parse(source, "m.ska");
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{diagnostics:?}");
        let beat = &module.blocks[0].beats[0];
        assert!(beat.is_logic);
        assert_eq!(
            beat.operations,
            vec![Operation::Mutation {
                lvalue: "flag".into(),
                kind: MutationKind::Switch,
                rvalue: None,
            }]
        );
    }

    #[test]
    fn query_in_condition_round_trips_through_method_call() {
        let (module, _) = parse(
            "#start\n(? is_admin()) Welcome, admin.\nWelcome, guest.\n",
            "m.ska",
        );
        let beat = &module.blocks[0].beats[0];
        let cond = beat.condition.as_ref().unwrap();
        match &cond.items[0] {
            ConditionalItem::Atom(atom) => {
                assert_eq!(atom.op, Comparator::Truthy);
                match &atom.left {
                    RValue::MethodCall(call) => assert_eq!(call.name.as_ref(), "is_admin"),
                    other => panic!("expected method call, got {other:?}"),
                }
            }
            other => panic!("expected atom, got {other:?}"),
        }
    }

    #[test]
    fn skips_unrecognized_lines_with_a_warning() {
        let (_module, diagnostics) = parse("#start\nHello.\n  !!! not an operation\n", "m.ska");
        assert!(diagnostics.iter().any(|d| !d.is_error()));
    }

    #[test]
    fn duplicate_block_tag_warns_but_last_one_wins() {
        let (module, diagnostics) = parse("#start\nFirst.\n#start\nSecond.\n", "m.ska");
        assert_eq!(module.blocks.len(), 1);
        assert_eq!(module.block_index("start"), Some(0));
        assert!(diagnostics
            .iter()
            .any(|d| !d.is_error() && d.message.contains("duplicate block tag")));
    }

    #[test]
    fn unreferenced_declaration_warns() {
        let (_module, diagnostics) = parse("~ unused = 0\n#start\nHello.\n", "m.ska");
        assert!(diagnostics
            .iter()
            .any(|d| !d.is_error() && d.message.contains("unused")));
    }

    #[test]
    fn referenced_declaration_does_not_warn() {
        let (_module, diagnostics) = parse("~ name = \"Ada\"\n#start\nHi, {name}.\n", "m.ska");
        assert!(!diagnostics.iter().any(|d| d.message.contains("unused")));
    }

    #[test]
    fn condition_close_paren_is_matched_not_first_found() {
        // The method call's own ")" must not be mistaken for the
        // condition's closing paren.
        let (module, diagnostics) = parse(
            "#start\n(? is_admin() and has_gold(10)) Welcome.\n",
            "m.ska",
        );
        assert!(diagnostics.is_empty());
        let beat = &module.blocks[0].beats[0];
        let cond = beat.condition.as_ref().unwrap();
        assert_eq!(cond.items.len(), 2);
        assert_eq!(
            beat.content.parts,
            vec![TextPart::Literal("Welcome.".into())]
        );
    }

    #[test]
    fn mixed_and_or_at_one_level_is_a_parse_error() {
        let (module, diagnostics) = parse("#start\n(? a and b or c) Welcome.\n", "m.ska");
        assert!(diagnostics.iter().any(|d| d.is_error()), "{diagnostics:?}");
        // Recovery still parses the rest of the beat; just the condition is lost.
        assert!(module.blocks[0].beats[0].condition.is_none());
    }

    #[test]
    fn mixed_and_or_parenthesized_into_a_subclause_is_fine() {
        let (module, diagnostics) = parse("#start\n(? a and (b or c)) Welcome.\n", "m.ska");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let cond = module.blocks[0].beats[0].condition.as_ref().unwrap();
        assert_eq!(cond.mode, ClauseMode::And);
        assert_eq!(cond.items.len(), 2);
        match &cond.items[1] {
            ConditionalItem::Clause(sub) => assert_eq!(sub.mode, ClauseMode::Or),
            other => panic!("expected nested clause, got {other:?}"),
        }
    }

    #[test]
    fn inline_comment_is_dropped_from_text_content() {
        let (module, diagnostics) = parse("#start\nHello {-- aside --} world.\n", "m.ska");
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{diagnostics:?}");
        let beat = &module.blocks[0].beats[0];
        assert_eq!(
            beat.content.parts,
            vec![TextPart::Literal("Hello world.".into())]
        );
    }
}
