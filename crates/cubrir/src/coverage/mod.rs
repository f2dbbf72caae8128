//! Line, branch and function coverage over the debug hooks.
//!
//! [`Coverage`] registers three observers on a [`DebugHooks`]
//! multiplexer: a script-load hook that seeds per-file statistics from
//! a [`ReflectedScript`], a single-step hook that counts line hits and
//! follows branch state, and a frame hook that counts function entries.
//! On demand the collected statistics serialize as LCOV, with the
//! source files copied next to the tracefile.

mod lcov;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::hooks::{DebugHooks, FrameState, HookId, LocationInfo, ScriptInfo};
use crate::paths::{absolute_path, diverging_child_components, normalize_path, strip_uri_scheme};
use crate::reflect::{BranchInfo, ReflectedScript, ReflectionEngine};
use crate::result::CubrirResult;

/// Hit counters for one branch point.
#[derive(Debug, Clone)]
pub struct BranchCounters {
    branch_point: u32,
    alternatives: Vec<u32>,
    hits: Vec<u32>,
    last_exit: u32,
    hit: bool,
}

impl BranchCounters {
    fn new(info: &BranchInfo) -> Self {
        Self {
            branch_point: info.branch_point,
            alternatives: info.alternatives.clone(),
            hits: vec![0; info.alternatives.len()],
            last_exit: info.last_exit(),
            hit: false,
        }
    }

    /// The line that decides between the alternatives
    #[must_use]
    pub fn branch_point(&self) -> u32 {
        self.branch_point
    }

    /// First executable line of each alternative
    #[must_use]
    pub fn alternatives(&self) -> &[u32] {
        &self.alternatives
    }

    /// Hit count per alternative, same length as [`Self::alternatives`]
    #[must_use]
    pub fn hits(&self) -> &[u32] {
        &self.hits
    }

    /// Whether the branch point itself was ever executed
    #[must_use]
    pub fn was_hit(&self) -> bool {
        self.hit
    }

    fn count_alternatives_matching(&mut self, line: u32) {
        for (alternative, hits) in self.alternatives.iter().zip(self.hits.iter_mut()) {
            if *alternative == line {
                *hits += 1;
            }
        }
    }
}

/// Per-file coverage counters.
///
/// `lines` maps 1-based line numbers one-to-one onto hit counts: `-1`
/// means non-executable, `0` executable but never reached, positive is
/// the hit count. Index zero is unused and always non-executable. The
/// one-to-one layout gives O(1) stepping and lets a hit on a line the
/// reflector thought non-executable be absorbed by upgrading the slot,
/// which is less noise than reporting misses for lines that could never
/// run.
#[derive(Debug, Clone)]
pub struct FileStatistics {
    lines: Vec<i32>,
    branches: Vec<Option<BranchCounters>>,
    functions: BTreeMap<String, u32>,
}

impl FileStatistics {
    fn from_reflection(script: &ReflectedScript) -> Self {
        let n_lines = script.n_lines() as usize;

        let mut lines = vec![-1_i32; n_lines + 1];
        for &line in script.expression_lines() {
            if let Some(slot) = lines.get_mut(line as usize) {
                *slot = 0;
            }
        }

        let mut branches: Vec<Option<BranchCounters>> = vec![None; n_lines + 1];
        for info in script.branches() {
            let point = info.branch_point as usize;
            if point < branches.len() {
                branches[point] = Some(BranchCounters::new(info));
            }
        }

        let functions = script
            .functions()
            .iter()
            .map(|f| (f.lookup_key(), 0))
            .collect();

        Self {
            lines,
            branches,
            functions,
        }
    }

    /// Hit counts indexed by line; see the type docs for the encoding
    #[must_use]
    pub fn lines(&self) -> &[i32] {
        &self.lines
    }

    /// Branch counters for the given branch-point line
    #[must_use]
    pub fn branch(&self, line: u32) -> Option<&BranchCounters> {
        self.branches.get(line as usize)?.as_ref()
    }

    /// All branch counters, ordered by branch point
    pub fn branches(&self) -> impl Iterator<Item = &BranchCounters> {
        self.branches.iter().flatten()
    }

    /// Hit count per function key
    #[must_use]
    pub fn functions(&self) -> &BTreeMap<String, u32> {
        &self.functions
    }

    fn branch_mut(&mut self, line: u32) -> Option<&mut BranchCounters> {
        self.branches.get_mut(line as usize)?.as_mut()
    }

    fn count_line_hit(&mut self, line: u32) {
        let index = line as usize;
        if index >= self.lines.len() {
            debug!(line, "step beyond the reflected line table");
            self.lines.resize(index + 1, -1);
        }
        if self.lines[index] == -1 {
            // Reflection is imprecise around function-declaration
            // lines; the engine sometimes executes the declaration
            // itself. Upgrade the slot rather than warn.
            debug!(line, "executed a line reflection marked non-executable");
            self.lines[index] = 0;
        }
        self.lines[index] += 1;
    }
}

/// The branch whose alternatives the next single steps may hit.
#[derive(Debug, Clone)]
struct ActiveBranch {
    filename: String,
    point: u32,
    last_exit: u32,
}

struct CoverageState {
    /// Covered path → statistics; `None` until the file's first script
    /// load seeds the tables.
    file_statistics: BTreeMap<String, Option<FileStatistics>>,
    reflector: Rc<dyn ReflectionEngine>,
    active_branch: Option<ActiveBranch>,
}

/// Builds per-file line/branch/function statistics from debug hook
/// events and writes them out as LCOV.
pub struct Coverage {
    hooks: DebugHooks,
    state: Rc<RefCell<CoverageState>>,
    /// Detached for the duration of [`Self::write_statistics`]
    script_load_hook: Cell<Option<HookId>>,
    single_step_hook: HookId,
    frame_step_hook: HookId,
}

impl std::fmt::Debug for Coverage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Coverage")
            .field("covered_paths", &state.file_statistics.len())
            .finish_non_exhaustive()
    }
}

impl Coverage {
    /// Start collecting coverage for `covered_paths` through `hooks`.
    ///
    /// `reflector` must be backed by an interpreter instance distinct
    /// from the debugged one; reflection must not perturb the state
    /// being measured. Covered paths are matched against loaded scripts
    /// by exact filename equality after normalization.
    pub fn new(
        hooks: DebugHooks,
        reflector: Rc<dyn ReflectionEngine>,
        covered_paths: &[impl AsRef<str>],
    ) -> Self {
        let file_statistics = covered_paths
            .iter()
            .map(|path| (normalize_path(path.as_ref()), None))
            .collect();

        let state = Rc::new(RefCell::new(CoverageState {
            file_statistics,
            reflector,
            active_branch: None,
        }));

        let script_load_hook = Cell::new(Some(Self::attach_script_load_hook(&hooks, &state)));

        let single_step_hook = hooks.add_singlestep_hook({
            let state = Rc::clone(&state);
            Rc::new(move |_hooks, info| on_single_step(&state, info))
        });

        let frame_step_hook = hooks.add_frame_step_hook({
            let state = Rc::clone(&state);
            Rc::new(move |_hooks, info, frame_state| {
                // Exits say nothing about how often a function ran
                if frame_state == FrameState::Entry {
                    on_frame_entry(&state, info);
                }
            })
        });

        Self {
            hooks,
            state,
            script_load_hook,
            single_step_hook,
            frame_step_hook,
        }
    }

    /// Statistics collected so far for a covered path, `None` when the
    /// path is not covered or no matching script has loaded yet.
    #[must_use]
    pub fn statistics_for(&self, filename: &str) -> Option<FileStatistics> {
        self.state
            .borrow()
            .file_statistics
            .get(&normalize_path(filename))?
            .clone()
    }

    /// Append an LCOV record for every covered file to
    /// `<output_directory>/coverage.lcov` and copy the source files
    /// under the output directory.
    ///
    /// Covered paths that never matched a loaded script are skipped.
    /// A failed source copy is logged and the record still written.
    ///
    /// # Errors
    ///
    /// Returns an error when the output directory cannot be created,
    /// the tracefile cannot be opened, or a record write fails.
    pub fn write_statistics(&self, output_directory: impl AsRef<Path>) -> CubrirResult<()> {
        let output_directory = output_directory.as_ref();
        fs::create_dir_all(output_directory)?;

        // Detach the script-load hook so scripts compiled while the
        // write is in progress cannot trigger statistics creation
        // mid-emission; reattach afterwards either way.
        if let Some(id) = self.script_load_hook.take() {
            self.hooks.remove_script_load_hook(id);
        }
        let result = self.write_all_records(output_directory);
        self.script_load_hook
            .set(Some(Self::attach_script_load_hook(&self.hooks, &self.state)));
        result
    }

    fn write_all_records(&self, output_directory: &Path) -> CubrirResult<()> {
        let tracefile = output_directory.join("coverage.lcov");
        // Append so repeated runs concatenate records
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&tracefile)?;
        let mut out = BufWriter::new(file);

        let absolute_output = absolute_path(output_directory);
        let state = self.state.borrow();

        for (filename, stats) in &state.file_statistics {
            // A covered path that never matched a loaded script
            let Some(stats) = stats else { continue };

            let diverged = diverging_child_components(filename, &absolute_output);
            let destination = absolute_output.join(diverged.trim_start_matches('/'));

            if let Err(err) = copy_source_to_output(filename, &destination) {
                warn!(
                    source = %filename,
                    destination = %destination.display(),
                    error = %err,
                    "failed to copy source file into coverage output"
                );
            }

            lcov::write_file_record(&mut out, &destination, stats)?;
        }

        out.flush()?;
        Ok(())
    }

    fn attach_script_load_hook(hooks: &DebugHooks, state: &Rc<RefCell<CoverageState>>) -> HookId {
        let state = Rc::clone(state);
        hooks.add_script_load_hook(Rc::new(move |_hooks, info| on_script_loaded(&state, info)))
    }
}

impl Drop for Coverage {
    fn drop(&mut self) {
        if let Some(id) = self.script_load_hook.take() {
            self.hooks.remove_script_load_hook(id);
        }
        self.hooks.remove_singlestep_hook(self.single_step_hook);
        self.hooks.remove_frame_step_hook(self.frame_step_hook);
    }
}

/// Seed statistics the first time a covered file's script loads.
fn on_script_loaded(state: &Rc<RefCell<CoverageState>>, info: &ScriptInfo) {
    let filename = info.filename();

    let needs_statistics = matches!(
        state.borrow().file_statistics.get(filename),
        Some(None)
    );
    if !needs_statistics {
        return;
    }

    let reflector = Rc::clone(&state.borrow().reflector);
    let reflected = ReflectedScript::new(filename, reflector);
    let statistics = FileStatistics::from_reflection(&reflected);

    state
        .borrow_mut()
        .file_statistics
        .insert(filename.to_owned(), Some(statistics));
}

fn on_single_step(state: &Rc<RefCell<CoverageState>>, info: &LocationInfo) {
    let frame = info.current_frame();
    let filename = &frame.current_function.filename;
    let line = frame.current_line;

    let mut state = state.borrow_mut();
    let state = &mut *state;

    // Not a file we cover, even if we are single-stepping it
    if !matches!(state.file_statistics.get(filename), Some(Some(_))) {
        return;
    }

    if let Some(Some(stats)) = state.file_statistics.get_mut(filename) {
        stats.count_line_hit(line);
    }

    // First credit the active branch's alternatives, then look for a
    // branch starting at this line
    if let Some(active) = state.active_branch.clone() {
        if let Some(Some(stats)) = state.file_statistics.get_mut(&active.filename) {
            if let Some(branch) = stats.branch_mut(active.point) {
                branch.count_alternatives_matching(line);
            }
        }
    }

    state.active_branch = {
        let branch_here = state
            .file_statistics
            .get_mut(filename)
            .and_then(Option::as_mut)
            .and_then(|stats| stats.branch_mut(line));

        match branch_here {
            Some(branch) => {
                branch.hit = true;
                Some(ActiveBranch {
                    filename: filename.clone(),
                    point: line,
                    last_exit: branch.last_exit,
                })
            }
            // Inside a case-like construct a later alternative may
            // still be picked, so the branch stays active until the
            // step goes past its last exit
            None => state
                .active_branch
                .take()
                .filter(|active| line <= active.last_exit),
        }
    };
}

fn on_frame_entry(state: &Rc<RefCell<CoverageState>>, info: &LocationInfo) {
    let function = &info.current_frame().current_function;

    // Toplevel frames have no function to credit
    let Some(name) = &function.function_name else {
        return;
    };

    let mut state = state.borrow_mut();
    let Some(Some(stats)) = state.file_statistics.get_mut(&function.filename) else {
        return;
    };

    let key = format!("{}:{}:{}", name, function.line, function.n_args);
    if !stats.functions.contains_key(&key) {
        debug!(%key, "entered a function missing from the reflection tables");
    }
    *stats.functions.entry(key).or_insert(0) += 1;
}

fn copy_source_to_output(source: &str, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    let source_path = strip_uri_scheme(source).unwrap_or(source);
    fs::copy(source_path, destination)?;
    Ok(())
}
