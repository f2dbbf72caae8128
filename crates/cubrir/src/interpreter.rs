//! Interpreter adapter surface.
//!
//! The debugged scripting engine sits behind the [`Interpreter`] trait:
//! the multiplexer never talks to an engine directly, only to the hook
//! slots and script queries declared here. An engine exposes exactly one
//! slot per hook kind; multiplexing many observers onto those slots is
//! the job of [`DebugHooks`](crate::DebugHooks).
//!
//! All methods take `&self`. The execution model is single-threaded and
//! cooperative, so implementations use interior mutability and must
//! clone a hook out of its slot before invoking it — a hook is allowed
//! to clear or replace its own slot re-entrantly.

use std::rc::Rc;

/// Opaque handle to a compiled script held by the interpreter.
///
/// The interpreter owns the script; the handle stays valid until the
/// destroy-script notification fires for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(u32);

impl ScriptId {
    /// Wrap a raw interpreter script index
    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw interpreter script index
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Opaque handle to a function object inside the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u32);

impl FunctionId {
    /// Wrap a raw interpreter function index
    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw interpreter function index
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// A program counter within a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pc(u32);

impl Pc {
    /// Wrap a raw program counter
    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw program counter
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Hook invoked on every interpreter interrupt while single-step mode
/// is active for the executing script.
pub type InterruptHook = Rc<dyn Fn(ScriptId, Pc)>;

/// Hook invoked before (`true`) and after (`false`) every call and
/// execute frame.
pub type FrameHook = Rc<dyn Fn(ScriptId, Pc, bool)>;

/// Hook invoked when the interpreter finishes compiling a script,
/// with its raw filename, base line and handle.
pub type NewScriptHook = Rc<dyn Fn(&str, u32, ScriptId)>;

/// Hook invoked when the interpreter releases a script.
pub type DestroyScriptHook = Rc<dyn Fn(ScriptId)>;

/// Hook installed at a specific `(script, pc)` trap site.
pub type TrapHook = Rc<dyn Fn(ScriptId, Pc)>;

/// The capability set the instrumentation core requires from an engine.
///
/// Used as `Rc<dyn Interpreter>`: the multiplexer and the coverage
/// engine hold non-owning (shared) handles, the embedder owns the
/// interpreter and outlives both.
pub trait Interpreter {
    /// Turn the engine's debug mode on or off
    fn set_debug_mode(&self, enabled: bool);

    /// Enable or disable single-step interrupts for one script
    fn set_single_step(&self, script: ScriptId, enabled: bool);

    /// Install or clear the engine's single interrupt slot
    fn set_interrupt_hook(&self, hook: Option<InterruptHook>);

    /// Install or clear the engine's call-and-execute frame slot
    fn set_frame_hook(&self, hook: Option<FrameHook>);

    /// Install or clear the new-script and destroy-script slots
    fn set_script_hooks(
        &self,
        on_new: Option<NewScriptHook>,
        on_destroy: Option<DestroyScriptHook>,
    );

    /// Install a trap at `(script, pc)`
    fn install_trap(&self, script: ScriptId, pc: Pc, hook: TrapHook);

    /// Remove the trap at `(script, pc)`, returning the installed hook
    fn clear_trap(&self, script: ScriptId, pc: Pc) -> Option<TrapHook>;

    /// Program counter closest to `line` within `script`.
    ///
    /// Always succeeds; out-of-range lines clamp to the script's first
    /// or last program counter.
    fn line_to_pc(&self, script: ScriptId, line: u32) -> Pc;

    /// Source line for a program counter within `script`
    fn pc_to_line(&self, script: ScriptId, pc: Pc) -> u32;

    /// Program counter just past the last instruction of `script`
    fn end_pc(&self, script: ScriptId) -> Pc;

    /// Raw (unnormalized) filename the script was compiled from
    fn script_filename(&self, script: ScriptId) -> String;

    /// First source line the script covers
    fn script_base_line(&self, script: ScriptId) -> u32;

    /// The function a script belongs to, if it is a function body
    fn script_function(&self, script: ScriptId) -> Option<FunctionId>;

    /// Name of a function, `None` when compiled anonymously
    fn function_name(&self, function: FunctionId) -> Option<String>;

    /// Declared parameter count of a function
    fn function_arity(&self, function: FunctionId) -> u32;
}
