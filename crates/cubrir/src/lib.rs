//! Cubrir: debug hooks and coverage for embedded scripting engines.
//!
//! A scripting engine exposes exactly one slot per debug hook kind.
//! Cubrir multiplexes any number of observers onto those slots and
//! builds line, branch and function coverage on top, reported in the
//! LCOV text format.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Coverage ── consumes hook events, owns per-file statistics  │
//! │     │   └── ReflectedScript ── reflection interpreter        │
//! │  DebugHooks ── usage-counted multiplexer over the hook slots │
//! │     │                                                        │
//! │  Interpreter (adapter trait) ── the debugged engine          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`DebugHooks`] reference-counts five engine capabilities (debug
//! mode, single-step mode, the interrupt, frame and script slots),
//! enabling each on first use and disabling it on last release, and
//! resolves breakpoints against scripts as they load. [`Coverage`]
//! registers three observers, seeds per-file tables from a
//! [`ReflectedScript`] built in a *separate* reflection interpreter,
//! and serializes everything as LCOV with
//! [`Coverage::write_statistics`].
//!
//! Everything is single-threaded and synchronous: the engine drives
//! callbacks to completion on its own thread, and the types here are
//! intentionally `!Send`.
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use cubrir::mock::{OutlineReflector, ScriptedInterpreter};
//! use cubrir::{Coverage, DebugHooks};
//!
//! let interp = Rc::new(ScriptedInterpreter::new());
//! let hooks = DebugHooks::new(interp.clone());
//!
//! let coverage = Coverage::new(
//!     hooks,
//!     Rc::new(OutlineReflector::new()),
//!     &["/tmp/covered.js"],
//! );
//!
//! // ... load and run scripts through the interpreter ...
//!
//! coverage.write_statistics("coverage-output")?;
//! # Ok::<(), cubrir::CubrirError>(())
//! ```

#![warn(missing_docs)]

pub mod coverage;
mod hooks;
pub mod interpreter;
pub mod mock;
mod paths;
mod reflect;
mod result;

pub use coverage::{BranchCounters, Coverage, FileStatistics};
pub use hooks::{
    DebugHooks, FrameCallback, FrameInfo, FrameState, FunctionKey, HookId, InterruptCallback,
    LocationInfo, ScriptInfo, ScriptLoadCallback,
};
pub use interpreter::{FunctionId, Interpreter, Pc, ScriptId};
pub use reflect::{BranchInfo, FunctionInfo, Reflection, ReflectedScript, ReflectionEngine};
pub use result::{CubrirError, CubrirResult};
