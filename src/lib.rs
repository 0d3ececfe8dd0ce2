// Skald: an authoring format and runtime for branching interactive narrative.
//
// Copyright (C) 2026  Skald contributors
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

//! Skald: an authoring format and runtime for branching interactive
//! narrative.
//!
//! A source module declares named blocks of dialogue beats, choices,
//! conditional logic, variable mutations, and outward-facing queries. A host
//! application drives an [`engine::Engine`] that parses a module with
//! [`parser::parse`], then walks it beat-by-beat emitting [`response::Response`]s
//! — text to display, queries the host must answer, choice prompts, module
//! transitions, or termination. The host replies with an [`response::Action`]
//! and the engine resumes until the script ends.
//!
//! This crate is the grammar + AST + interpreting engine core only: the
//! terminal front-end, language server, and foreign-function wrapper that
//! would sit on top of it are out of scope.

pub mod ast;
pub mod cursor;
pub mod diagnostics;
pub mod engine;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod response;
pub mod state;
pub mod value;

pub use engine::Engine;
pub use response::{Action, ErrorCode, Response};
pub use value::{RValue, SimpleValue};
