//! Reflected view of a source file.
//!
//! A [`ReflectedScript`] answers three questions about a source file:
//! which lines host executable expressions, where its branch points and
//! their alternatives are, and which functions it declares. The answers
//! come from a reflection routine evaluated inside a *separate*
//! interpreter instance, reached through the [`ReflectionEngine`]
//! trait; the debugged interpreter's state is never perturbed, and one
//! reflection interpreter can be shared across every script because the
//! routine is effectively pure.
//!
//! Reflection can be very expensive for large scripts, so it runs
//! lazily on the first query and the result is cached for the lifetime
//! of the object.

use std::cell::OnceCell;
use std::fs;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::result::CubrirResult;

/// A function found by the reflection routine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Declared name, `None` for anonymous functions
    pub name: Option<String>,
    /// 1-based line of the declaration
    pub line: u32,
    /// Declared parameter count
    pub n_params: u32,
}

impl FunctionInfo {
    /// Stable key identifying this function within its file.
    ///
    /// The reflection API cannot uniquely identify a function by name
    /// alone: functions may be anonymous, shadow an outer function of
    /// the same name, or share a line. Keying on name, line and arity
    /// disambiguates everything except multiple anonymous functions
    /// with the same arity on one line.
    #[must_use]
    pub fn lookup_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.name.as_deref().unwrap_or("(anonymous)"),
            self.line,
            self.n_params
        )
    }
}

/// A branch point and the first line of each alternative reachable
/// from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    /// The line that decides between the alternatives
    #[serde(rename = "point")]
    pub branch_point: u32,
    /// First executable line of each alternative, in source order
    #[serde(rename = "exits")]
    pub alternatives: Vec<u32>,
}

impl BranchInfo {
    /// The highest-numbered alternative; stepping past it means
    /// execution has left the branch.
    #[must_use]
    pub fn last_exit(&self) -> u32 {
        self.alternatives.iter().copied().max().unwrap_or(0)
    }
}

/// The wire object the reflection routine returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reflection {
    /// Declared functions
    pub functions: Vec<FunctionInfo>,
    /// Branch points with their alternatives
    pub branches: Vec<BranchInfo>,
    /// Lines hosting at least one executable expression
    #[serde(rename = "expressionLines")]
    pub expression_lines: Vec<u32>,
}

/// Evaluates the reflection routine against script source.
///
/// Implementations are backed by an interpreter instance distinct from
/// the one being debugged, with the reflection routine loaded once as a
/// resource.
pub trait ReflectionEngine {
    /// Parse `source` and return its reflection tables. Line numbers in
    /// the result are relative to `start_line` so they stay
    /// source-accurate after shebang stripping.
    fn eval_reflect(&self, source: &str, start_line: u32) -> CubrirResult<Reflection>;
}

#[derive(Default)]
struct Tables {
    n_lines: u32,
    expression_lines: Vec<u32>,
    branches: Vec<BranchInfo>,
    functions: Vec<FunctionInfo>,
}

/// A lazy, caching reflected view of one source file.
pub struct ReflectedScript {
    filename: String,
    engine: Rc<dyn ReflectionEngine>,
    tables: OnceCell<Tables>,
}

impl std::fmt::Debug for ReflectedScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectedScript")
            .field("filename", &self.filename)
            .field("reflected", &self.is_reflected())
            .finish_non_exhaustive()
    }
}

impl ReflectedScript {
    /// Create a view of `filename`. Nothing is read or parsed until the
    /// first query.
    #[must_use]
    pub fn new(filename: impl Into<String>, engine: Rc<dyn ReflectionEngine>) -> Self {
        Self {
            filename: filename.into(),
            engine,
            tables: OnceCell::new(),
        }
    }

    /// The source filename this view describes
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Whether the one-shot reflection has run yet
    #[must_use]
    pub fn is_reflected(&self) -> bool {
        self.tables.get().is_some()
    }

    /// Number of lines in the file, counted on the original text
    /// before any shebang stripping. Zero when the file was unreadable.
    pub fn n_lines(&self) -> u32 {
        self.tables().n_lines
    }

    /// Lines hosting at least one executable expression, strictly
    /// ascending, 1-based.
    pub fn expression_lines(&self) -> &[u32] {
        &self.tables().expression_lines
    }

    /// Branch points found in the file
    pub fn branches(&self) -> &[BranchInfo] {
        &self.tables().branches
    }

    /// Functions declared in the file
    pub fn functions(&self) -> &[FunctionInfo] {
        &self.tables().functions
    }

    fn tables(&self) -> &Tables {
        self.tables.get_or_init(|| match self.perform_reflection() {
            Ok(tables) => tables,
            Err(err) => {
                warn!(filename = %self.filename, error = %err, "reflection failed, tables are empty");
                Tables::default()
            }
        })
    }

    fn perform_reflection(&self) -> CubrirResult<Tables> {
        let original = fs::read_to_string(&self.filename)?;

        // Line numbers reported by the engine are relative to the
        // starting line, so the count must come from the original text.
        let n_lines = count_lines(&original);

        let (source, start_line) = strip_shebang(&original);
        let mut reflection = self.engine.eval_reflect(source, start_line)?;

        reflection.expression_lines.sort_unstable();
        reflection.expression_lines.dedup();

        Ok(Tables {
            n_lines,
            expression_lines: reflection.expression_lines,
            branches: reflection.branches,
            functions: reflection.functions,
        })
    }
}

fn count_lines(text: &str) -> u32 {
    1 + text.bytes().filter(|&b| b == b'\n').count() as u32
}

/// Strips a leading `#!...` line, adjusting the starting line number so
/// reflected line numbers stay source-accurate.
fn strip_shebang(source: &str) -> (&str, u32) {
    if source.starts_with("#!") {
        match source.find('\n') {
            Some(newline) => (&source[newline + 1..], 2),
            None => ("", 2),
        }
    } else {
        (source, 1)
    }
}
