// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]
#![deny(unsafe_code)]

//! # dotlift
//!
//! Reconstructs structured C# from CIL method bodies. `dotlift` reads a raw
//! instruction stream into an instruction tree, runs a pipeline of control-flow
//! and data-flow transforms over it, and builds a statement tree with typed
//! expressions and sequence points mapping every statement back to IL offsets.
//!
//! ## Features
//!
//! - **Stack-to-tree import** - The IL reader turns stack code into an instruction tree over stack slots
//! - **Assignment folding** - Inline, compound and post-increment assignments recovered from expanded forms
//! - **Using recovery** - `try/finally` with a guarded `Dispose` call becomes `using`
//! - **Dead-store analysis** - Definite assignment drives store and initializer removal
//! - **Typed expressions** - C# promotion rules decide where casts are needed
//! - **Sequence points** - Every statement maps back to the IL ranges it came from
//! - **Parallel** - Many functions decompile independently with `rayon`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dotlift::prelude::*;
//!
//! let decompiler = Decompiler::new(Arc::new(SimpleTypeSystem::new()));
//! let result = decompiler.decompile_body(&raw_body, &CancellationToken::new())?;
//! println!("{} statements", result.body.statement_count());
//! println!("{}", result.events.summary());
//! # Ok::<(), dotlift::Error>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────────┐   ┌────────────────┐
//! │ il::reader │──▶│ il::Function │──▶│   compiler    │──▶│      ast       │
//! │ raw stream │   │ instr. tree  │   │ PassScheduler │   │ statements and │
//! └────────────┘   └──────────────┘   └───────┬───────┘   │ seq. points    │
//!                                             │           └────────────────┘
//!                                     ┌───────┴───────┐
//!                                     │   analysis    │
//!                                     │ CFG, symbolic │
//!                                     │ definite asg. │
//!                                     └───────────────┘
//! ```
//!
//! - [`il`] - Instruction tree, match helpers and the IL reader
//! - [`analysis`] - Control-flow graph, symbolic evaluation, definite assignment
//! - [`compiler`] - Transform pipeline, settings and the event log
//! - [`ast`] - Expression and statement trees, layout and sequence points
//! - [`typesystem`] - Types, members and resolution
//! - [`Decompiler`] - Entry point running all of the above
//!
//! ## Error Handling
//!
//! A pattern that does not match is never an error; transforms just report no
//! change, and expressions that have no C# form become error placeholders in
//! the tree. [`Error`] is reserved for input that cannot be processed at all,
//! internal invariant violations and cancellation.
//!
//! ## Logging
//!
//! Transform activity lands in the per-function [`compiler::EventLog`].
//! Developer tracing goes through the `log` facade; the library never
//! installs a logger.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,ignore
/// use dotlift::prelude::*;
///
/// let settings = DecompilerSettings::default().with_parallel(false);
/// let decompiler = Decompiler::with_settings(Arc::new(SimpleTypeSystem::new()), settings);
/// ```
pub mod prelude;

pub mod analysis;
pub mod ast;
pub mod compiler;
mod decompiler;
pub mod il;
pub mod typesystem;
pub mod utils;

/// `dotlift` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotlift` Error type
///
/// # Examples
///
/// ```rust,ignore
/// use dotlift::{CancellationToken, Error};
///
/// match decompiler.decompile(function, &CancellationToken::new()) {
///     Ok(result) => println!("{} sequence points", result.sequence_points.len()),
///     Err(Error::Cancelled) => println!("cancelled"),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

pub use decompiler::{DecompiledFunction, Decompiler};
pub use utils::CancellationToken;
