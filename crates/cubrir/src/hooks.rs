//! Multiplexed debug hooks over a single interpreter.
//!
//! The interpreter exposes exactly one slot per hook kind. [`DebugHooks`]
//! lets any number of observers register breakpoints, single-step
//! callbacks, frame callbacks and script-load callbacks against those
//! slots by reference-counting five underlying capabilities: debug
//! mode, single-step mode, the interrupt slot, the call-and-execute
//! frame slot, and the new/destroy-script slots.
//!
//! Each capability is enabled on the interpreter on its counter's 0→1
//! transition and disabled on the 1→0 transition. Some of these states
//! (debug mode, single-step mode) are expensive, so none may be left
//! enabled while its counter is zero.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::interpreter::{Interpreter, Pc, ScriptId, TrapHook};
use crate::paths::normalize_path;

/// Handle to a hook registration.
///
/// Ids are process-wide and monotonically increasing across all hook
/// kinds, so a handle is never valid for more than one kind and never
/// reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u32);

impl HookId {
    /// The raw registration number
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

static NEXT_HOOK_ID: AtomicU32 = AtomicU32::new(1);

fn next_hook_id() -> HookId {
    HookId(NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed))
}

/// Which side of a frame a frame-step dispatch describes.
///
/// The frame callback is delivered twice per frame, once on entry and
/// once on exit. Profilers and the like need to tell these apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Before the first instruction of the frame
    Entry,
    /// After the last instruction of the frame
    Exit,
}

/// Identifies the function enclosing an execution point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionKey {
    /// Normalized filename of the enclosing script
    pub filename: String,
    /// Name of the enclosing function; `Some("(anonymous)")` for
    /// unnamed functions, `None` at toplevel
    pub function_name: Option<String>,
    /// Line the enclosing function starts on
    pub line: u32,
    /// Declared argument count of the enclosing function
    pub n_args: u32,
}

/// The current frame at a trap, interrupt or frame-step dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Line being executed
    pub current_line: u32,
    /// The function the execution point is inside of
    pub current_function: FunctionKey,
}

/// Source location handed to trap, interrupt and frame callbacks.
#[derive(Debug, Clone)]
pub struct LocationInfo {
    current_frame: FrameInfo,
}

impl LocationInfo {
    /// The current stack frame, including function name and position
    #[must_use]
    pub fn current_frame(&self) -> &FrameInfo {
        &self.current_frame
    }
}

/// Details of a newly compiled script, handed to script-load callbacks.
#[derive(Debug, Clone)]
pub struct ScriptInfo {
    filename: String,
    base_line: u32,
}

impl ScriptInfo {
    /// Normalized filename the script was compiled from
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// First source line the script covers
    #[must_use]
    pub fn base_line(&self) -> u32 {
        self.base_line
    }
}

/// Callback for breakpoints and single-step interrupts.
pub type InterruptCallback = Rc<dyn Fn(&DebugHooks, &LocationInfo)>;

/// Callback for frame entry and exit.
pub type FrameCallback = Rc<dyn Fn(&DebugHooks, &LocationInfo, FrameState)>;

/// Callback for script-load notifications.
pub type ScriptLoadCallback = Rc<dyn Fn(&DebugHooks, &ScriptInfo)>;

/// A breakpoint resolved to a trap site.
struct Breakpoint {
    script: ScriptId,
    pc: Pc,
}

/// A breakpoint whose script has not been loaded yet. It converts to a
/// [`Breakpoint`] at the first script load that contains its line.
struct PendingBreakpoint {
    filename: String,
    line: u32,
}

struct Registration<C> {
    id: HookId,
    callback: C,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ScriptKey {
    filename: String,
    base_line: u32,
}

/// The five interpreter capabilities governed by usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capability {
    DebugMode,
    SingleStepMode,
    InterruptHook,
    FrameHook,
    NewScriptHook,
}

impl Capability {
    fn describe(self) -> &'static str {
        match self {
            Self::DebugMode => "debug mode",
            Self::SingleStepMode => "single-step mode",
            Self::InterruptHook => "interrupt hook",
            Self::FrameHook => "frame hook",
            Self::NewScriptHook => "new-script hook",
        }
    }
}

#[derive(Default)]
struct HooksState {
    // Capability usage counters. Enabled on 0→1, disabled on 1→0.
    debug_mode_uses: u32,
    single_step_uses: u32,
    interrupt_uses: u32,
    frame_uses: u32,
    new_script_uses: u32,

    single_step_hooks: Vec<Registration<InterruptCallback>>,
    frame_hooks: Vec<Registration<FrameCallback>>,
    script_load_hooks: Vec<Registration<ScriptLoadCallback>>,

    // Resolved and pending sets are disjoint; an id lives in exactly
    // one of them. The callback table carries the user callback for
    // both, keyed the same way.
    breakpoints: HashMap<HookId, Breakpoint>,
    pending_breakpoints: HashMap<HookId, PendingBreakpoint>,
    breakpoint_callbacks: HashMap<HookId, InterruptCallback>,

    // (normalized filename, base line) → script handle
    scripts_loaded: HashMap<ScriptKey, ScriptId>,

    // Program counters captured at frame entries. The tail is the
    // enclosing function's location for interrupt and trap reporting.
    pc_stack: Vec<Pc>,
}

impl HooksState {
    fn counter_mut(&mut self, capability: Capability) -> &mut u32 {
        match capability {
            Capability::DebugMode => &mut self.debug_mode_uses,
            Capability::SingleStepMode => &mut self.single_step_uses,
            Capability::InterruptHook => &mut self.interrupt_uses,
            Capability::FrameHook => &mut self.frame_uses,
            Capability::NewScriptHook => &mut self.new_script_uses,
        }
    }
}

impl Drop for HooksState {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        assert_eq!(self.debug_mode_uses, 0, "debug mode still in use at drop");
        assert_eq!(self.single_step_uses, 0, "single-step mode still in use at drop");
        assert_eq!(self.interrupt_uses, 0, "interrupt hook still in use at drop");
        assert_eq!(self.frame_uses, 0, "frame hook still in use at drop");
        assert_eq!(self.new_script_uses, 0, "new-script hook still in use at drop");
        assert!(self.single_step_hooks.is_empty(), "live single-step registrations at drop");
        assert!(self.frame_hooks.is_empty(), "live frame registrations at drop");
        assert!(self.script_load_hooks.is_empty(), "live script-load registrations at drop");
        assert!(self.breakpoints.is_empty(), "live breakpoints at drop");
        assert!(self.pending_breakpoints.is_empty(), "live pending breakpoints at drop");
        assert!(self.pc_stack.is_empty(), "unbalanced frame entries at drop");
    }
}

/// Multiplexes observers onto the interpreter's single debug hook slots.
///
/// `DebugHooks` is a cheap handle over shared state; clones observe and
/// mutate the same registrations. Dropping the last handle asserts that
/// every registration was removed and every capability released.
#[derive(Clone)]
pub struct DebugHooks {
    interp: Rc<dyn Interpreter>,
    state: Rc<RefCell<HooksState>>,
}

impl std::fmt::Debug for DebugHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("DebugHooks")
            .field("debug_mode_uses", &state.debug_mode_uses)
            .field("scripts_loaded", &state.scripts_loaded.len())
            .finish_non_exhaustive()
    }
}

impl DebugHooks {
    /// Create a multiplexer bound to `interp`. No capability is taken
    /// until the first registration.
    #[must_use]
    pub fn new(interp: Rc<dyn Interpreter>) -> Self {
        Self {
            interp,
            state: Rc::new(RefCell::new(HooksState::default())),
        }
    }

    /// Register a breakpoint on `line` of `filename`.
    ///
    /// If a loaded script matching `filename` whose line range contains
    /// `line` is found, a trap is installed immediately; otherwise the
    /// breakpoint stays pending and resolves at the first matching
    /// script load. `callback` fires each time the trap is hit.
    pub fn add_breakpoint(
        &self,
        filename: &str,
        line: u32,
        callback: InterruptCallback,
    ) -> HookId {
        let id = next_hook_id();
        let target = normalize_path(filename);

        match self.find_script_containing(&target, line) {
            Some(script) => {
                let breakpoint = self.install_trap_for(script, line, Rc::clone(&callback));
                self.state.borrow_mut().breakpoints.insert(id, breakpoint);
            }
            None => {
                self.state.borrow_mut().pending_breakpoints.insert(
                    id,
                    PendingBreakpoint {
                        filename: target,
                        line,
                    },
                );
                // Resolution needs to hear about scripts as they load
                self.use_new_script_hook();
            }
        }

        self.state.borrow_mut().breakpoint_callbacks.insert(id, callback);
        self.use_debug_mode();
        self.use_frame_execution();
        id
    }

    /// Remove a breakpoint. Panics if `id` is unknown or was already
    /// removed.
    pub fn remove_breakpoint(&self, id: HookId) {
        enum Removed {
            Resolved(Breakpoint),
            Pending,
        }

        let removed = {
            let mut state = self.state.borrow_mut();
            if let Some(breakpoint) = state.breakpoints.remove(&id) {
                Some(Removed::Resolved(breakpoint))
            } else if state.pending_breakpoints.remove(&id).is_some() {
                Some(Removed::Pending)
            } else {
                None
            }
        };

        match removed {
            Some(Removed::Resolved(breakpoint)) => {
                self.interp.clear_trap(breakpoint.script, breakpoint.pc);
            }
            // A pending breakpoint still holds the new-script capability
            // it took at registration
            Some(Removed::Pending) => self.finish_using_new_script_hook(),
            None => panic!("removed unknown breakpoint {id:?}"),
        }

        self.state.borrow_mut().breakpoint_callbacks.remove(&id);
        self.finish_using_frame_execution();
        self.finish_using_debug_mode();
    }

    /// Register a callback fired on every single-step interrupt.
    ///
    /// Takes debug mode, the interrupt slot, single-step mode, frame
    /// execution and the new-script slot (so single-step mode is also
    /// applied to scripts loaded after this registration).
    pub fn add_singlestep_hook(&self, callback: InterruptCallback) -> HookId {
        self.use_debug_mode();
        self.use_interrupt_hook();
        self.use_single_step_mode();
        self.use_frame_execution();
        self.use_new_script_hook();

        let id = next_hook_id();
        self.state
            .borrow_mut()
            .single_step_hooks
            .push(Registration { id, callback });
        id
    }

    /// Remove a single-step registration. Panics if `id` is unknown.
    pub fn remove_singlestep_hook(&self, id: HookId) {
        remove_registration(&mut self.state.borrow_mut().single_step_hooks, id, "single-step");
        self.finish_using_frame_execution();
        self.finish_using_interrupt_hook();
        self.finish_using_single_step_mode();
        self.finish_using_new_script_hook();
        self.finish_using_debug_mode();
    }

    /// Register a callback fired after each script compiles, once the
    /// script is tracked and pending breakpoints have resolved.
    pub fn add_script_load_hook(&self, callback: ScriptLoadCallback) -> HookId {
        self.use_debug_mode();
        self.use_new_script_hook();

        let id = next_hook_id();
        self.state
            .borrow_mut()
            .script_load_hooks
            .push(Registration { id, callback });
        id
    }

    /// Remove a script-load registration. Panics if `id` is unknown.
    pub fn remove_script_load_hook(&self, id: HookId) {
        remove_registration(&mut self.state.borrow_mut().script_load_hooks, id, "script-load");
        self.finish_using_new_script_hook();
        self.finish_using_debug_mode();
    }

    /// Register a callback fired on entry to and exit from every frame.
    pub fn add_frame_step_hook(&self, callback: FrameCallback) -> HookId {
        self.use_debug_mode();
        self.use_frame_execution();

        let id = next_hook_id();
        self.state
            .borrow_mut()
            .frame_hooks
            .push(Registration { id, callback });
        id
    }

    /// Remove a frame-step registration. Panics if `id` is unknown.
    pub fn remove_frame_step_hook(&self, id: HookId) {
        remove_registration(&mut self.state.borrow_mut().frame_hooks, id, "frame-step");
        self.finish_using_frame_execution();
        self.finish_using_debug_mode();
    }

    // ------------------------------------------------------------------
    // Capability reference counting
    // ------------------------------------------------------------------

    fn use_debug_mode(&self) {
        if self.acquire(Capability::DebugMode) {
            self.interp.set_debug_mode(true);
        }
    }

    fn finish_using_debug_mode(&self) {
        if self.release(Capability::DebugMode) {
            self.interp.set_debug_mode(false);
        }
    }

    fn use_interrupt_hook(&self) {
        if self.acquire(Capability::InterruptHook) {
            let hooks = self.clone();
            self.interp
                .set_interrupt_hook(Some(Rc::new(move |script, pc| {
                    hooks.on_interrupt(script, pc);
                })));
        }
    }

    fn finish_using_interrupt_hook(&self) {
        if self.release(Capability::InterruptHook) {
            self.interp.set_interrupt_hook(None);
        }
    }

    fn use_single_step_mode(&self) {
        if self.acquire(Capability::SingleStepMode) {
            self.set_single_step_everywhere(true);
        }
    }

    fn finish_using_single_step_mode(&self) {
        if self.release(Capability::SingleStepMode) {
            self.set_single_step_everywhere(false);
        }
    }

    fn set_single_step_everywhere(&self, enabled: bool) {
        let scripts: Vec<ScriptId> = self.state.borrow().scripts_loaded.values().copied().collect();
        for script in scripts {
            self.interp.set_single_step(script, enabled);
        }
    }

    fn use_frame_execution(&self) {
        if self.acquire(Capability::FrameHook) {
            let hooks = self.clone();
            self.interp
                .set_frame_hook(Some(Rc::new(move |script, pc, entering| {
                    hooks.on_frame(script, pc, entering);
                })));
            self.state.borrow_mut().pc_stack.clear();
        }
    }

    fn finish_using_frame_execution(&self) {
        if self.release(Capability::FrameHook) {
            self.interp.set_frame_hook(None);
            self.state.borrow_mut().pc_stack.clear();
        }
    }

    fn use_new_script_hook(&self) {
        if self.acquire(Capability::NewScriptHook) {
            let on_new: crate::interpreter::NewScriptHook = {
                let hooks = self.clone();
                Rc::new(move |filename: &str, base_line: u32, script: ScriptId| {
                    hooks.on_new_script(filename, base_line, script);
                })
            };
            let on_destroy: crate::interpreter::DestroyScriptHook = {
                let hooks = self.clone();
                Rc::new(move |script: ScriptId| hooks.on_script_destroyed(script))
            };
            self.interp.set_script_hooks(Some(on_new), Some(on_destroy));
        }
    }

    fn finish_using_new_script_hook(&self) {
        if self.release(Capability::NewScriptHook) {
            self.interp.set_script_hooks(None, None);
        }
    }

    /// Increment a usage counter, returning whether this was the 0→1
    /// transition.
    fn acquire(&self, capability: Capability) -> bool {
        let mut state = self.state.borrow_mut();
        let counter = state.counter_mut(capability);
        *counter += 1;
        *counter == 1
    }

    /// Decrement a usage counter, returning whether this was the 1→0
    /// transition. Panics on underflow.
    fn release(&self, capability: Capability) -> bool {
        let mut state = self.state.borrow_mut();
        let counter = state.counter_mut(capability);
        assert!(
            *counter > 0,
            "{} usage counter underflow",
            capability.describe()
        );
        *counter -= 1;
        *counter == 0
    }

    // ------------------------------------------------------------------
    // Interpreter-driven callbacks
    // ------------------------------------------------------------------

    fn on_interrupt(&self, script: ScriptId, pc: Pc) {
        let function_pc = self.frame_pc().unwrap_or(pc);
        let info = self.location_info(script, pc, function_pc);

        let callbacks: Vec<InterruptCallback> = {
            let state = self.state.borrow();
            state
                .single_step_hooks
                .iter()
                .map(|r| Rc::clone(&r.callback))
                .collect()
        };
        for callback in callbacks {
            callback(self, &info);
        }
    }

    fn on_frame(&self, script: ScriptId, pc: Pc, entering: bool) {
        // On entry the frame's own pc goes on the stack; on exit the
        // tail is the entry pc of the frame being left, so function
        // location reporting stays stable across the whole frame.
        let frame_pc = {
            let mut state = self.state.borrow_mut();
            if entering {
                state.pc_stack.push(pc);
                pc
            } else {
                let top = state.pc_stack.last().copied().unwrap_or(pc);
                state.pc_stack.pop();
                top
            }
        };

        let info = self.location_info(script, pc, frame_pc);
        let frame_state = if entering { FrameState::Entry } else { FrameState::Exit };

        let callbacks: Vec<FrameCallback> = {
            let state = self.state.borrow();
            state.frame_hooks.iter().map(|r| Rc::clone(&r.callback)).collect()
        };
        for callback in callbacks {
            callback(self, &info, frame_state);
        }
    }

    fn on_new_script(&self, filename: &str, base_line: u32, script: ScriptId) {
        // Scripts with no filename are engine-internal initialization
        if filename.is_empty() {
            return;
        }

        let filename = normalize_path(filename);

        let single_step_in_use = {
            let mut state = self.state.borrow_mut();
            state.scripts_loaded.insert(
                ScriptKey {
                    filename: filename.clone(),
                    base_line,
                },
                script,
            );
            state.single_step_uses > 0
        };
        if single_step_in_use {
            self.interp.set_single_step(script, true);
        }

        // Convert pending breakpoints whose line falls inside this
        // script into real traps
        let end_line = self.script_end_line(script);
        let matched: Vec<(HookId, u32)> = {
            let state = self.state.borrow();
            state
                .pending_breakpoints
                .iter()
                .filter(|(_, pending)| {
                    pending.filename == filename
                        && base_line <= pending.line
                        && pending.line <= end_line
                })
                .map(|(&id, pending)| (id, pending.line))
                .collect()
        };
        for (id, line) in matched {
            let callback = self
                .state
                .borrow()
                .breakpoint_callbacks
                .get(&id)
                .map(Rc::clone);
            let Some(callback) = callback else { continue };

            let breakpoint = self.install_trap_for(script, line, callback);
            {
                let mut state = self.state.borrow_mut();
                state.pending_breakpoints.remove(&id);
                state.breakpoints.insert(id, breakpoint);
            }
            // The breakpoint is no longer pending, so its claim on
            // script-load notifications is over
            self.finish_using_new_script_hook();
        }

        let info = ScriptInfo {
            filename,
            base_line,
        };
        let callbacks: Vec<ScriptLoadCallback> = {
            let state = self.state.borrow();
            state
                .script_load_hooks
                .iter()
                .map(|r| Rc::clone(&r.callback))
                .collect()
        };
        for callback in callbacks {
            callback(self, &info);
        }
    }

    fn on_script_destroyed(&self, script: ScriptId) {
        let key = ScriptKey {
            filename: normalize_path(&self.interp.script_filename(script)),
            base_line: self.interp.script_base_line(script),
        };
        self.state.borrow_mut().scripts_loaded.remove(&key);
    }

    // ------------------------------------------------------------------
    // Location reporting
    // ------------------------------------------------------------------

    fn location_info(&self, script: ScriptId, pc: Pc, function_pc: Pc) -> LocationInfo {
        let filename = normalize_path(&self.interp.script_filename(script));
        let function = self.interp.script_function(script);
        let function_name = function.map(|f| {
            self.interp
                .function_name(f)
                .unwrap_or_else(|| "(anonymous)".to_owned())
        });
        let n_args = function.map_or(0, |f| self.interp.function_arity(f));

        LocationInfo {
            current_frame: FrameInfo {
                current_line: self.interp.pc_to_line(script, pc),
                current_function: FunctionKey {
                    filename,
                    function_name,
                    line: self.interp.pc_to_line(script, function_pc),
                    n_args,
                },
            },
        }
    }

    fn frame_pc(&self) -> Option<Pc> {
        self.state.borrow().pc_stack.last().copied()
    }

    // ------------------------------------------------------------------
    // Breakpoint plumbing
    // ------------------------------------------------------------------

    fn install_trap_for(
        &self,
        script: ScriptId,
        line: u32,
        callback: InterruptCallback,
    ) -> Breakpoint {
        let pc = self.interp.line_to_pc(script, line);
        let hooks = self.clone();
        let trap: TrapHook = Rc::new(move |script, pc| {
            let function_pc = hooks.frame_pc().unwrap_or(pc);
            let info = hooks.location_info(script, pc, function_pc);
            // Breakpoints do not multicast; only the owner hears it
            callback(&hooks, &info);
        });
        self.interp.install_trap(script, pc, trap);
        Breakpoint { script, pc }
    }

    /// First loaded script whose name matches and whose line range
    /// contains `line`. When several scripts qualify, any of them
    /// resolves the breakpoint.
    fn find_script_containing(&self, filename: &str, line: u32) -> Option<ScriptId> {
        let state = self.state.borrow();
        for (key, &script) in &state.scripts_loaded {
            if key.filename == filename
                && key.base_line <= line
                && line <= self.script_end_line(script)
            {
                return Some(script);
            }
        }
        None
    }

    fn script_end_line(&self, script: ScriptId) -> u32 {
        self.interp.pc_to_line(script, self.interp.end_pc(script))
    }

    #[cfg(test)]
    pub(crate) fn usage_counters(&self) -> [u32; 5] {
        let state = self.state.borrow();
        [
            state.debug_mode_uses,
            state.single_step_uses,
            state.interrupt_uses,
            state.frame_uses,
            state.new_script_uses,
        ]
    }

    #[cfg(test)]
    pub(crate) fn pending_breakpoint_count(&self) -> usize {
        self.state.borrow().pending_breakpoints.len()
    }

    #[cfg(test)]
    pub(crate) fn resolved_breakpoint_count(&self) -> usize {
        self.state.borrow().breakpoints.len()
    }
}

fn remove_registration<C>(registrations: &mut Vec<Registration<C>>, id: HookId, kind: &str) {
    let index = registrations
        .iter()
        .position(|r| r.id == id)
        .unwrap_or_else(|| panic!("removed unknown {kind} hook {id:?}"));
    registrations.remove(index);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::{Cell, RefCell};

    use proptest::prelude::*;

    use super::*;
    use crate::mock::ScriptedInterpreter;

    fn fixture() -> (Rc<ScriptedInterpreter>, DebugHooks) {
        let interp = Rc::new(ScriptedInterpreter::new());
        let hooks = DebugHooks::new(interp.clone());
        (interp, hooks)
    }

    fn noop_interrupt() -> InterruptCallback {
        Rc::new(|_, _| {})
    }

    fn noop_frame() -> FrameCallback {
        Rc::new(|_, _, _| {})
    }

    fn noop_script_load() -> ScriptLoadCallback {
        Rc::new(|_, _| {})
    }

    #[test]
    fn debug_mode_on_while_breakpoint_registered() {
        let (interp, hooks) = fixture();
        assert!(!interp.debug_mode());

        let id = hooks.add_breakpoint("/tmp/a.js", 1, noop_interrupt());
        assert!(interp.debug_mode());

        hooks.remove_breakpoint(id);
        assert!(!interp.debug_mode());
    }

    #[test]
    fn debug_mode_on_while_singlestep_registered() {
        let (interp, hooks) = fixture();
        let id = hooks.add_singlestep_hook(noop_interrupt());
        assert!(interp.debug_mode());
        hooks.remove_singlestep_hook(id);
        assert!(!interp.debug_mode());
    }

    #[test]
    fn debug_mode_on_while_script_load_hook_registered() {
        let (interp, hooks) = fixture();
        let id = hooks.add_script_load_hook(noop_script_load());
        assert!(interp.debug_mode());
        hooks.remove_script_load_hook(id);
        assert!(!interp.debug_mode());
    }

    #[test]
    fn debug_mode_on_while_frame_step_hook_registered() {
        let (interp, hooks) = fixture();
        let id = hooks.add_frame_step_hook(noop_frame());
        assert!(interp.debug_mode());
        hooks.remove_frame_step_hook(id);
        assert!(!interp.debug_mode());
    }

    #[test]
    fn debug_mode_stays_on_until_the_last_user_releases() {
        let (interp, hooks) = fixture();
        let first = hooks.add_frame_step_hook(noop_frame());
        let second = hooks.add_script_load_hook(noop_script_load());

        hooks.remove_frame_step_hook(first);
        assert!(interp.debug_mode());

        hooks.remove_script_load_hook(second);
        assert!(!interp.debug_mode());
    }

    #[test]
    fn add_then_remove_restores_initial_state() {
        let (_interp, hooks) = fixture();
        let id = hooks.add_singlestep_hook(noop_interrupt());
        hooks.remove_singlestep_hook(id);
        assert_eq!(hooks.usage_counters(), [0; 5]);
        assert_eq!(hooks.pending_breakpoint_count(), 0);
        assert_eq!(hooks.resolved_breakpoint_count(), 0);
    }

    #[test]
    #[should_panic(expected = "unknown single-step hook")]
    fn removing_a_hook_twice_is_fatal() {
        let (_interp, hooks) = fixture();
        let id = hooks.add_singlestep_hook(noop_interrupt());
        hooks.remove_singlestep_hook(id);
        hooks.remove_singlestep_hook(id);
    }

    #[test]
    #[should_panic(expected = "unknown breakpoint")]
    fn removing_a_breakpoint_twice_is_fatal() {
        let (_interp, hooks) = fixture();
        let id = hooks.add_breakpoint("/tmp/a.js", 1, noop_interrupt());
        hooks.remove_breakpoint(id);
        hooks.remove_breakpoint(id);
    }

    #[test]
    fn ids_are_unique_across_hook_kinds() {
        let (_interp, hooks) = fixture();
        let a = hooks.add_singlestep_hook(noop_interrupt());
        let b = hooks.add_frame_step_hook(noop_frame());
        let c = hooks.add_script_load_hook(noop_script_load());
        assert!(a != b && b != c && a != c);
        hooks.remove_singlestep_hook(a);
        hooks.remove_frame_step_hook(b);
        hooks.remove_script_load_hook(c);
    }

    #[test]
    fn breakpoint_before_load_stays_pending_then_resolves_once() {
        let (interp, hooks) = fixture();
        let id = hooks.add_breakpoint("/tmp/pending.js", 1, noop_interrupt());
        assert_eq!(hooks.pending_breakpoint_count(), 1);
        assert_eq!(hooks.resolved_breakpoint_count(), 0);

        let script = interp.load_script(
            "/tmp/pending.js",
            "let a = 1;\nlet expected_breakpoint_line = 1;\n",
        );
        assert_eq!(hooks.pending_breakpoint_count(), 0);
        assert_eq!(hooks.resolved_breakpoint_count(), 1);
        assert!(interp.has_trap(script, Pc::new(1)));

        // A second matching load must not resolve it again
        interp.load_script("/tmp/pending.js", "let a = 1;\n");
        assert_eq!(hooks.resolved_breakpoint_count(), 1);

        hooks.remove_breakpoint(id);
        assert!(!interp.has_trap(script, Pc::new(1)));
    }

    #[test]
    fn breakpoint_resolves_eagerly_against_a_loaded_script() {
        let (interp, hooks) = fixture();
        let script = interp.load_script("/tmp/eager.js", "let a = 1;\nlet b = 2;\n");

        let id = hooks.add_breakpoint("/tmp/eager.js", 2, noop_interrupt());
        assert_eq!(hooks.pending_breakpoint_count(), 0);
        assert!(interp.has_trap(script, Pc::new(2)));

        hooks.remove_breakpoint(id);
    }

    #[test]
    fn breakpoint_added_before_run_fires_exactly_once() {
        let (interp, hooks) = fixture();
        let hits = Rc::new(Cell::new(0_u32));
        let last_line = Rc::new(Cell::new(0_u32));

        let id = {
            let hits = Rc::clone(&hits);
            let last_line = Rc::clone(&last_line);
            hooks.add_breakpoint(
                "/tmp/bp.js",
                1,
                Rc::new(move |_hooks, info| {
                    hits.set(hits.get() + 1);
                    last_line.set(info.current_frame().current_line);
                }),
            )
        };

        let script = interp.load_script(
            "/tmp/bp.js",
            "let a = 1;\nlet expected_breakpoint_line = 1;\n",
        );
        interp.run(script);

        assert_eq!(hits.get(), 1);
        assert_eq!(last_line.get(), 1);
        hooks.remove_breakpoint(id);
    }

    #[test]
    fn breakpoint_added_during_script_load_hook_fires() {
        let (interp, hooks) = fixture();
        let hits = Rc::new(Cell::new(0_u32));
        let breakpoint_id: Rc<Cell<Option<HookId>>> = Rc::new(Cell::new(None));

        let load_id = {
            let hits = Rc::clone(&hits);
            let breakpoint_id = Rc::clone(&breakpoint_id);
            hooks.add_script_load_hook(Rc::new(move |hooks, info| {
                if breakpoint_id.get().is_some() {
                    return;
                }
                let hits = Rc::clone(&hits);
                let id = hooks.add_breakpoint(
                    info.filename(),
                    1,
                    Rc::new(move |_hooks, _info| hits.set(hits.get() + 1)),
                );
                breakpoint_id.set(Some(id));
            }))
        };

        let script = interp.load_script("/tmp/during.js", "let a = 1;\nlet b = 2;\n");
        interp.run(script);

        assert!(hits.get() > 0);
        hooks.remove_breakpoint(breakpoint_id.get().unwrap());
        hooks.remove_script_load_hook(load_id);
    }

    #[test]
    fn removed_breakpoint_does_not_fire() {
        let (interp, hooks) = fixture();
        let hits = Rc::new(Cell::new(0_u32));

        let id = {
            let hits = Rc::clone(&hits);
            hooks.add_breakpoint(
                "/tmp/removed.js",
                1,
                Rc::new(move |_hooks, _info| hits.set(hits.get() + 1)),
            )
        };

        let script = interp.load_script("/tmp/removed.js", "let a = 1;\n");
        hooks.remove_breakpoint(id);
        interp.run(script);

        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn interrupts_are_received_in_single_step_mode() {
        let (interp, hooks) = fixture();
        let stepped: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));

        let id = {
            let stepped = Rc::clone(&stepped);
            hooks.add_singlestep_hook(Rc::new(move |_hooks, info| {
                stepped.borrow_mut().push(info.current_frame().current_line);
            }))
        };

        let script = interp.load_script("/tmp/steps.js", "let a = 1;\nlet b = 2;\n");
        interp.run(script);
        assert_eq!(*stepped.borrow(), vec![1, 2]);

        hooks.remove_singlestep_hook(id);
    }

    #[test]
    fn interrupts_stop_after_the_hook_is_removed() {
        let (interp, hooks) = fixture();
        let stepped = Rc::new(Cell::new(0_u32));

        let id = {
            let stepped = Rc::clone(&stepped);
            hooks.add_singlestep_hook(Rc::new(move |_hooks, _info| {
                stepped.set(stepped.get() + 1);
            }))
        };

        let script = interp.load_script("/tmp/unstepped.js", "let a = 1;\n");
        hooks.remove_singlestep_hook(id);
        interp.run(script);

        assert_eq!(stepped.get(), 0);
        assert!(!interp.single_step_enabled(script));
    }

    #[test]
    fn single_step_mode_applies_to_scripts_loaded_later() {
        let (interp, hooks) = fixture();
        let id = hooks.add_singlestep_hook(noop_interrupt());

        let script = interp.load_script("/tmp/later.js", "let a = 1;\n");
        assert!(interp.single_step_enabled(script));

        hooks.remove_singlestep_hook(id);
        assert!(!interp.single_step_enabled(script));
    }

    #[test]
    fn frame_step_observes_declared_functions() {
        let (interp, hooks) = fixture();
        let entered: Rc<RefCell<Vec<Option<String>>>> = Rc::new(RefCell::new(Vec::new()));

        let id = {
            let entered = Rc::clone(&entered);
            hooks.add_frame_step_hook(Rc::new(move |_hooks, info, state| {
                if state == FrameState::Entry {
                    entered
                        .borrow_mut()
                        .push(info.current_frame().current_function.function_name.clone());
                }
            }))
        };

        let script = interp.load_script(
            "/tmp/frames.js",
            "let a = 1;\nfunction foo(a) {\n    return a;\n}\nlet b = foo(a);\n",
        );
        interp.run(script);

        let entered = entered.borrow();
        assert!(entered.contains(&None)); // the toplevel frame
        assert!(entered.contains(&Some("foo".to_owned())));
        drop(entered);

        hooks.remove_frame_step_hook(id);
    }

    #[test]
    fn frame_exit_reports_the_function_entry_line() {
        let (interp, hooks) = fixture();
        let exits: Rc<RefCell<Vec<(Option<String>, u32)>>> = Rc::new(RefCell::new(Vec::new()));

        let id = {
            let exits = Rc::clone(&exits);
            hooks.add_frame_step_hook(Rc::new(move |_hooks, info, state| {
                if state == FrameState::Exit {
                    let frame = info.current_frame();
                    exits
                        .borrow_mut()
                        .push((frame.current_function.function_name.clone(), frame.current_function.line));
                }
            }))
        };

        let script = interp.load_script(
            "/tmp/exits.js",
            "function foo(a) {\n    return a;\n}\nlet b = foo(1);\n",
        );
        interp.run(script);

        // The function's frame exits at its closing brace but still
        // reports the line the frame was entered on
        let exits = exits.borrow();
        assert!(exits.contains(&(Some("foo".to_owned()), 1)));
        drop(exits);

        hooks.remove_frame_step_hook(id);
    }

    #[test]
    fn same_kind_callbacks_dispatch_in_insertion_order() {
        let (interp, hooks) = fixture();
        let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));

        let first = {
            let order = Rc::clone(&order);
            hooks.add_script_load_hook(Rc::new(move |_hooks, _info| order.borrow_mut().push(1)))
        };
        let second = {
            let order = Rc::clone(&order);
            hooks.add_script_load_hook(Rc::new(move |_hooks, _info| order.borrow_mut().push(2)))
        };

        interp.load_script("/tmp/order.js", "let a = 1;\n");
        assert_eq!(*order.borrow(), vec![1, 2]);

        hooks.remove_script_load_hook(first);
        hooks.remove_script_load_hook(second);
    }

    #[test]
    fn script_load_notification_not_sent_after_removal() {
        let (interp, hooks) = fixture();
        let seen = Rc::new(Cell::new(0_u32));

        let id = {
            let seen = Rc::clone(&seen);
            hooks.add_script_load_hook(Rc::new(move |_hooks, _info| seen.set(seen.get() + 1)))
        };

        interp.load_script("/tmp/one.js", "let a = 1;\n");
        assert_eq!(seen.get(), 1);

        hooks.remove_script_load_hook(id);
        interp.load_script("/tmp/two.js", "let b = 2;\n");
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn destroyed_scripts_no_longer_resolve_breakpoints() {
        let (interp, hooks) = fixture();

        // Keep the script hooks installed so the destroy notification
        // is delivered
        let load_id = hooks.add_script_load_hook(noop_script_load());
        let script = interp.load_script("/tmp/gone.js", "let a = 1;\n");
        interp.destroy_script(script);

        let id = hooks.add_breakpoint("/tmp/gone.js", 1, noop_interrupt());
        assert_eq!(hooks.pending_breakpoint_count(), 1);

        hooks.remove_breakpoint(id);
        hooks.remove_script_load_hook(load_id);
    }

    #[test]
    fn relative_breakpoint_targets_match_relative_script_names() {
        let (interp, hooks) = fixture();
        let id = hooks.add_breakpoint("relative.js", 1, noop_interrupt());
        assert_eq!(hooks.pending_breakpoint_count(), 1);

        // The engine announces the same relative name; both sides
        // normalize against the working directory
        interp.load_script("relative.js", "let a = 1;\n");
        assert_eq!(hooks.pending_breakpoint_count(), 0);
        assert_eq!(hooks.resolved_breakpoint_count(), 1);

        hooks.remove_breakpoint(id);
    }

    proptest! {
        /// Any interleaving of adds followed by their removes leaves
        /// every usage counter where it started.
        #[test]
        fn add_remove_sequences_balance_the_counters(kinds in proptest::collection::vec(0_u8..4, 1..12)) {
            let interp = Rc::new(ScriptedInterpreter::new());
            let hooks = DebugHooks::new(interp.clone());

            let mut registered: Vec<(u8, HookId)> = Vec::new();
            for kind in kinds {
                let id = match kind {
                    0 => hooks.add_singlestep_hook(noop_interrupt()),
                    1 => hooks.add_frame_step_hook(noop_frame()),
                    2 => hooks.add_script_load_hook(noop_script_load()),
                    _ => hooks.add_breakpoint("/tmp/prop.js", 1, noop_interrupt()),
                };
                prop_assert!(interp.debug_mode());
                registered.push((kind, id));
            }

            // Remove in reverse order of registration
            while let Some((kind, id)) = registered.pop() {
                match kind {
                    0 => hooks.remove_singlestep_hook(id),
                    1 => hooks.remove_frame_step_hook(id),
                    2 => hooks.remove_script_load_hook(id),
                    _ => hooks.remove_breakpoint(id),
                }
            }

            prop_assert_eq!(hooks.usage_counters(), [0; 5]);
            prop_assert!(!interp.debug_mode());
        }
    }
}
