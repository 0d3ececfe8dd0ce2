//! The resumable beat scheduler: the only stateful, host-facing surface of
//! the crate.
//!
//! A fetch-dispatch-advance loop in the style of a bytecode VM, generalized
//! from "a flat program with a single yield reason" to a four-phase
//! per-beat state machine with five suspension kinds.

use log::{debug, trace};

use crate::ast::{Beat, Conditional, MutationKind, Operation};
use crate::cursor::{Cursor, Phase, PendingQuery, QueuedGo};
use crate::evaluator::{
    collect_calls_in_conditional, collect_calls_in_operation, resolve_conditional,
    resolve_rvalue_to_simple, resolve_text,
};
use crate::parser::parse;
use crate::response::{Action, ErrorCode, QueryCall, Response, ResponseOption, RuntimeError};
use crate::state::EngineState;
use crate::value::{MethodCall, SimpleValue};

/// Safety cap on `next()`'s internal iterations, guarding against a
/// malformed module that never reaches a suspension point. A debugging
/// guard, not a correctness guarantee.
const MAX_ITERATIONS: usize = 50;

/// The engine: a loaded module, its mutable state, and its cursor.
/// `verbose` is an instance setting rather than process-wide state, so
/// multiple engines in one process can be tuned independently.
pub struct Engine {
    module: Option<crate::ast::Module>,
    state: EngineState,
    cursor: Cursor,
    verbose: bool,
}

impl Engine {
    pub fn new(verbose: bool) -> Self {
        Engine {
            module: None,
            state: EngineState::new(),
            cursor: Cursor::at_block_start(0),
            verbose,
        }
    }

    /// Parses `source` and installs it as the current module. State and the
    /// query cache persist across loads; declarations are (re-)seeded,
    /// imported or fresh, only where absent.
    pub fn load(
        &mut self,
        source: &str,
        filename: impl Into<String>,
    ) -> Vec<crate::diagnostics::Diagnostic> {
        let (module, diagnostics) = parse(source, filename);
        for decl in &module.declarations {
            self.state.seed_declaration(&decl.name, &decl.initial);
        }
        if self.verbose {
            debug!(
                "loaded module {:?}: {} block(s), {} diagnostic(s)",
                module.filename,
                module.blocks.len(),
                diagnostics.len()
            );
        }
        self.module = Some(module);
        diagnostics
    }

    /// Enters at block index 0, beat 0.
    pub fn start(&mut self) -> Response {
        match self.require_module() {
            Ok(()) => {}
            Err(resp) => return resp,
        }
        if self
            .module
            .as_ref()
            .expect("require_module checked above")
            .blocks
            .is_empty()
        {
            return Response::error(ErrorCode::EmptyModule, "module has no blocks", 0);
        }
        self.cursor = Cursor::at_block_start(0);
        self.begin()
    }

    /// Enters at the named block, beat 0; errors if the tag is unknown.
    pub fn start_at(&mut self, tag: &str) -> Response {
        match self.require_module() {
            Ok(()) => {}
            Err(resp) => return resp,
        }
        let module = self.module.as_ref().expect("require_module checked above");
        if module.blocks.is_empty() {
            return Response::error(ErrorCode::EmptyModule, "module has no blocks", 0);
        }
        let Some(index) = module.block_index(tag) else {
            return Response::error(
                ErrorCode::ModuleTagNotFound,
                format!("no block tagged {tag:?}"),
                0,
            );
        };
        self.cursor = Cursor::at_block_start(index);
        self.begin()
    }

    /// Advances past the current Content response, selecting choice
    /// `choice_index`. `act(0)` is the canonical continue when a beat has
    /// no choices.
    pub fn act(&mut self, choice_index: i64) -> Response {
        self.cursor.choice_selection = Some(choice_index);
        self.cursor.enter_phase(Phase::Execution);
        self.next()
    }

    /// Answers the current top-of-stack Query.
    pub fn answer(&mut self, value: Option<SimpleValue>) -> Response {
        let Some(pending) = self.cursor.pop_query() else {
            return Response::error(
                ErrorCode::ResolutionQueueEmpty,
                "no pending query to answer",
                0,
            );
        };
        if pending.expects_response && value.is_none() {
            let line = pending.line_number;
            self.cursor.push_query(pending);
            return Response::error(
                ErrorCode::ExpectedAnswer,
                "this query expects a non-null answer",
                line,
            );
        }
        let args: Vec<SimpleValue> = pending
            .call
            .args
            .iter()
            .map(|arg| resolve_rvalue_to_simple(arg, &self.state))
            .collect();
        let key = pending.call.call_key(&args);
        self.state.cache_answer(key, value);
        self.next()
    }

    /// Dispatches a protocol `Action`; the uniform entry point a host loop
    /// can drive without matching on which public method to call next.
    pub fn dispatch(&mut self, action: Action) -> Response {
        match action {
            Action::Start => self.start(),
            Action::StartAt { tag } => self.start_at(&tag),
            Action::Act { choice_index } => self.act(choice_index),
            Action::Answer { value } => self.answer(value),
        }
    }

    fn require_module(&self) -> Result<(), Response> {
        if self.module.is_none() {
            return Err(Response::error(
                ErrorCode::EmptyModule,
                "no module loaded",
                0,
            ));
        }
        Ok(())
    }

    /// Runs `advance_cursor` once to position at the fresh block's first
    /// beat, then drives the loop.
    fn begin(&mut self) -> Response {
        if let Err(err) = self.advance_cursor() {
            return Response::Error(err);
        }
        self.next()
    }

    /// Resolves `queued_transition` to a block index, resets `beat_index`,
    /// increments it, rolls over to the next block on overflow, and marks
    /// the cursor exited once it runs past the last block.
    ///
    /// Running off the last beat of the last block is ordinary termination,
    /// not a host-visible failure: it sets `exited` directly so the next
    /// `next()` tick returns `End`. `ErrorCode::Eof` stays in the catalog to
    /// classify *why* the cursor can't advance any further, but that
    /// classification only ever surfaces through `exited`/`End` — this
    /// scheduler never constructs a standalone `Response::Error(Eof)`.
    fn advance_cursor(&mut self) -> Result<(), RuntimeError> {
        let module = self.module.as_ref().expect("module loaded");

        if let Some(tag) = self.cursor.queued_transition.take() {
            let Some(index) = module.block_index(&tag) else {
                return Err(RuntimeError::new(
                    ErrorCode::ModuleTagNotFound,
                    format!("no block tagged {tag:?}"),
                    0,
                ));
            };
            self.cursor.block_index = index;
            self.cursor.beat_index = -1;
        }

        self.cursor.beat_index += 1;
        loop {
            let Some(block) = module.blocks.get(self.cursor.block_index) else {
                debug!("advance_cursor: EOF, past the last block");
                self.cursor.exited = true;
                return Ok(());
            };
            if (self.cursor.beat_index as usize) < block.beats.len() {
                break;
            }
            self.cursor.block_index += 1;
            self.cursor.beat_index = 0;
        }
        self.cursor.enter_phase(Phase::Conditional);
        Ok(())
    }

    fn current_beat(&self) -> &Beat {
        let module = self.module.as_ref().expect("module loaded");
        &module.blocks[self.cursor.block_index].beats[self.cursor.beat_index as usize]
    }

    /// Builds the host-facing `QueryCall` for `call`, resolving each
    /// argument against current state; by the time a call reaches the top
    /// of the resolution stack, every nested call it depended on has
    /// already been answered and popped (reverse-order enqueue, see
    /// `enqueue_calls`).
    fn build_query_call(&self, call: &MethodCall) -> QueryCall {
        let args: Vec<SimpleValue> = call
            .args
            .iter()
            .map(|arg| resolve_rvalue_to_simple(arg, &self.state))
            .collect();
        QueryCall {
            method: call.name.to_string(),
            args,
        }
    }

    /// Pushes `calls` onto the LIFO resolution stack in reverse, so the
    /// first call in source order ends up on top and is queried first.
    fn enqueue_calls(&mut self, calls: Vec<(MethodCall, bool)>, line_number: u32) {
        for (call, expects_response) in calls.into_iter().rev() {
            self.cursor.push_query(PendingQuery {
                call,
                expects_response,
                line_number,
            });
        }
    }

    fn collect_condition_calls(condition: &Conditional) -> Vec<(MethodCall, bool)> {
        let mut calls = Vec::new();
        collect_calls_in_conditional(condition, &mut calls);
        calls
    }

    /// The core driver loop: queued exit/go first, then the top pending
    /// query, then phase dispatch, capped to guard against malformed input
    /// that never suspends.
    fn next(&mut self) -> Response {
        for _ in 0..MAX_ITERATIONS {
            if let Some(argument) = self.cursor.queued_exit.take() {
                self.cursor.exited = true;
                return Response::Exit { argument };
            }
            if self.cursor.exited {
                return Response::End;
            }
            if let Some(go) = self.cursor.queued_go.take() {
                return Response::GoModule {
                    module_path: go.module_path,
                    start_tag: go.start_tag,
                };
            }
            if let Some(pending) = self.cursor.pending_query() {
                let call = self.build_query_call(&pending.call);
                return Response::Query {
                    call,
                    expects_response: pending.expects_response,
                    line_number: pending.line_number,
                };
            }

            let outcome = match self.cursor.phase {
                Phase::Conditional => self.run_conditional_phase(),
                Phase::Resolution => self.run_resolution_phase(),
                Phase::Presentation => self.run_presentation_phase(),
                Phase::Execution => self.run_execution_phase(),
            };
            match outcome {
                Ok(Some(response)) => return response,
                Ok(None) => continue,
                Err(err) => return Response::Error(err),
            }
        }
        Response::error(
            ErrorCode::Unknown,
            "exceeded the maximum number of scheduler iterations for one beat",
            0,
        )
    }

    /// Handles `else` skip logic, enqueues the beat's condition calls, and
    /// on drain evaluates the condition.
    fn run_conditional_phase(&mut self) -> Result<Option<Response>, RuntimeError> {
        let beat = self.current_beat();
        let line_number = beat.line_number;

        if beat.is_else {
            let passed = !self.cursor.did_last_condition_pass;
            self.cursor.did_last_condition_pass = passed;
            return if passed {
                self.cursor.enter_phase(Phase::Resolution);
                Ok(None)
            } else {
                self.advance_cursor()?;
                Ok(None)
            };
        }

        if let Some(condition) = beat.condition.clone() {
            if !self.cursor.queries_seeded {
                let calls = Self::collect_condition_calls(&condition);
                self.cursor.queries_seeded = true;
                if !calls.is_empty() {
                    trace!("conditional phase: enqueuing {} call(s)", calls.len());
                    self.enqueue_calls(calls, line_number);
                    return Ok(None);
                }
            }
            let passed = resolve_conditional(&condition, &self.state);
            self.cursor.did_last_condition_pass = passed;
            if passed {
                self.cursor.enter_phase(Phase::Resolution);
            } else {
                self.advance_cursor()?;
            }
        } else {
            self.cursor.did_last_condition_pass = true;
            self.cursor.enter_phase(Phase::Resolution);
        }
        Ok(None)
    }

    /// Enqueues the beat's own operation calls and each choice's condition
    /// calls; once drained, applies the beat's operations and moves to
    /// Presentation.
    fn run_resolution_phase(&mut self) -> Result<Option<Response>, RuntimeError> {
        let beat = self.current_beat();
        let line_number = beat.line_number;

        if !self.cursor.queries_seeded {
            let mut calls = Vec::new();
            for op in &beat.operations {
                collect_calls_in_operation(op, &mut calls);
            }
            for choice in &beat.choices {
                if let Some(condition) = &choice.condition {
                    collect_calls_in_conditional(condition, &mut calls);
                }
            }
            self.cursor.queries_seeded = true;
            if !calls.is_empty() {
                trace!("resolution phase: enqueuing {} call(s)", calls.len());
                self.enqueue_calls(calls, line_number);
                return Ok(None);
            }
        }

        let operations = beat.operations.clone();
        for op in &operations {
            self.apply_operation(op)?;
        }
        self.cursor.enter_phase(Phase::Presentation);
        Ok(None)
    }

    /// Logic beats advance silently; others build a Content response and
    /// halt for `act`.
    fn run_presentation_phase(&mut self) -> Result<Option<Response>, RuntimeError> {
        let beat = self.current_beat();
        if beat.is_logic {
            self.advance_cursor()?;
            return Ok(None);
        }

        let attribution = beat.attribution.to_string();
        let chunks = resolve_text(&beat.content, &self.state);
        let options = beat
            .choices
            .iter()
            .map(|choice| ResponseOption {
                chunks: resolve_text(&choice.content, &self.state),
                is_available: choice
                    .condition
                    .as_ref()
                    .map(|c| resolve_conditional(c, &self.state))
                    .unwrap_or(true),
            })
            .collect();
        Ok(Some(Response::Content {
            attribution,
            chunks,
            options,
        }))
    }

    /// Bounds-checks the selected choice, rejects if unavailable, enqueues
    /// and applies its operations, then advances.
    fn run_execution_phase(&mut self) -> Result<Option<Response>, RuntimeError> {
        let beat = self.current_beat();
        let line_number = beat.line_number;

        if beat.choices.is_empty() {
            self.advance_cursor()?;
            return Ok(None);
        }

        let selection = self.cursor.choice_selection.unwrap_or(0);
        if selection < 0 || selection as usize >= beat.choices.len() {
            self.cursor.choice_selection = None;
            return Err(RuntimeError::new(
                ErrorCode::ChoiceOutOfBounds,
                format!("choice index {selection} is out of bounds"),
                line_number,
            ));
        }
        let choice_index = selection as usize;
        let choice = &beat.choices[choice_index];
        let available = choice
            .condition
            .as_ref()
            .map(|c| resolve_conditional(c, &self.state))
            .unwrap_or(true);
        if !available {
            self.cursor.choice_selection = None;
            return Err(RuntimeError::new(
                ErrorCode::ChoiceUnavailable,
                format!("choice {choice_index} is not currently available"),
                line_number,
            ));
        }

        if !self.cursor.queries_seeded {
            let mut calls = Vec::new();
            for op in &choice.operations {
                collect_calls_in_operation(op, &mut calls);
            }
            self.cursor.queries_seeded = true;
            if !calls.is_empty() {
                trace!("execution phase: enqueuing {} call(s)", calls.len());
                self.enqueue_calls(calls, choice.line_number);
                return Ok(None);
            }
        }

        let operations = choice.operations.clone();
        for op in &operations {
            self.apply_operation(op)?;
        }
        self.cursor.choice_selection = None;
        self.advance_cursor()?;
        Ok(None)
    }

    fn apply_operation(&mut self, operation: &Operation) -> Result<(), RuntimeError> {
        match operation {
            Operation::Move { target_tag } => {
                self.cursor.queued_transition = Some(target_tag.to_string());
            }
            Operation::MethodCall(_) => {}
            Operation::Mutation { lvalue, kind, rvalue } => {
                self.apply_mutation(lvalue, *kind, rvalue.as_ref())?;
            }
            Operation::GoModule {
                module_path,
                start_tag,
            } => {
                self.cursor.queued_go = Some(QueuedGo {
                    module_path: module_path.to_string(),
                    start_tag: start_tag.to_string(),
                });
            }
            Operation::Exit { argument } => {
                let value = argument
                    .as_ref()
                    .map(|rv| resolve_rvalue_to_simple(rv, &self.state));
                self.cursor.queued_exit = Some(value);
            }
        }
        Ok(())
    }

    fn apply_mutation(
        &mut self,
        lvalue: &crate::value::Str,
        kind: MutationKind,
        rvalue: Option<&crate::value::RValue>,
    ) -> Result<(), RuntimeError> {
        match kind {
            MutationKind::Equate => {
                let rvalue = rvalue.expect("equate mutation always carries an rvalue");
                let value = resolve_rvalue_to_simple(rvalue, &self.state);
                self.state.set(lvalue.to_string(), value);
            }
            MutationKind::Switch => match self.state.get(lvalue.as_ref()) {
                Some(SimpleValue::Bool(b)) => {
                    let flipped = !*b;
                    self.state.set(lvalue.to_string(), SimpleValue::Bool(flipped));
                }
                Some(_) => {
                    return Err(RuntimeError::new(
                        ErrorCode::TypeMismatch,
                        format!("cannot switch non-bool variable {lvalue:?}"),
                        0,
                    ))
                }
                None => {
                    self.state.set(lvalue.to_string(), SimpleValue::Bool(true));
                }
            },
            MutationKind::Add | MutationKind::Subtract => {
                let rvalue = rvalue.expect("add/subtract mutation always carries an rvalue");
                let delta = resolve_rvalue_to_simple(rvalue, &self.state);
                let sign = if matches!(kind, MutationKind::Add) { 1.0 } else { -1.0 };
                match (self.state.get(lvalue.as_ref()).cloned(), &delta) {
                    (Some(SimpleValue::Int(current)), SimpleValue::Int(d)) => {
                        self.state
                            .set(lvalue.to_string(), SimpleValue::Int(current + sign as i32 * d));
                    }
                    (Some(SimpleValue::Float(current)), SimpleValue::Float(d)) => {
                        self.state
                            .set(lvalue.to_string(), SimpleValue::Float(current + sign as f32 * d));
                    }
                    (None, SimpleValue::Int(d)) => {
                        self.state
                            .set(lvalue.to_string(), SimpleValue::Int(sign as i32 * d));
                    }
                    (None, SimpleValue::Float(d)) => {
                        self.state
                            .set(lvalue.to_string(), SimpleValue::Float(sign as f32 * d));
                    }
                    _ => {
                        // Non-numeric add/subtract: source is ambiguous here,
                        // so no-op plus a warning rather than a hard error.
                        debug!(
                            "ignoring add/subtract on non-numeric variable {lvalue:?}"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}
