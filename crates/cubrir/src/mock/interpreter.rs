//! A scripted engine for driving the instrumentation end-to-end.
//!
//! [`ScriptedInterpreter`] implements the [`Interpreter`] adapter over
//! the same outline the mock reflector uses. Loading a source file
//! produces one toplevel script plus one script per declared function,
//! each announced through the new-script slot; program counters are
//! modeled as line numbers. `run` walks the executable lines in order,
//! delivering frame, interrupt and trap callbacks exactly the way the
//! real engine sequences them: frame entry first, interrupts and traps
//! per line, nested calls inline, frame exit last.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::interpreter::{
    DestroyScriptHook, FrameHook, FunctionId, Interpreter, InterruptHook, NewScriptHook, Pc,
    ScriptId, TrapHook,
};
use crate::result::CubrirResult;

use super::parse::ScriptOutline;

/// Nested call depth at which the mock stops recursing.
const MAX_CALL_DEPTH: u32 = 16;

struct MockScript {
    filename: String,
    base_line: u32,
    last_line: u32,
    entry_line: u32,
    function: Option<FunctionId>,
    executable: Vec<u32>,
    calls: HashMap<u32, ScriptId>,
}

struct MockFunction {
    name: Option<String>,
    arity: u32,
}

#[derive(Default)]
struct Inner {
    debug_mode: bool,
    next_script: u32,
    next_function: u32,
    scripts: HashMap<ScriptId, MockScript>,
    functions: HashMap<FunctionId, MockFunction>,
    traps: HashMap<(ScriptId, Pc), TrapHook>,
    single_step: HashSet<ScriptId>,
    interrupt_hook: Option<InterruptHook>,
    frame_hook: Option<FrameHook>,
    new_script_hook: Option<NewScriptHook>,
    destroy_script_hook: Option<DestroyScriptHook>,
}

impl Inner {
    fn alloc_script(&mut self) -> ScriptId {
        self.next_script += 1;
        ScriptId::new(self.next_script)
    }

    fn alloc_function(&mut self) -> FunctionId {
        self.next_function += 1;
        FunctionId::new(self.next_function)
    }
}

/// Deterministic, synchronous engine stand-in.
#[derive(Default)]
pub struct ScriptedInterpreter {
    inner: RefCell<Inner>,
}

impl std::fmt::Debug for ScriptedInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ScriptedInterpreter")
            .field("debug_mode", &inner.debug_mode)
            .field("scripts", &inner.scripts.len())
            .finish_non_exhaustive()
    }
}

impl ScriptedInterpreter {
    /// A fresh engine with nothing loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `source` under `filename`, announcing the toplevel
    /// script and one script per declared function. Returns the
    /// toplevel script handle.
    pub fn load_script(&self, filename: &str, source: &str) -> ScriptId {
        let outline = ScriptOutline::parse(source, 1);

        let (toplevel, function_scripts) = {
            let mut inner = self.inner.borrow_mut();

            let toplevel = inner.alloc_script();
            let mut function_scripts: Vec<ScriptId> = Vec::new();
            for function in outline.functions() {
                let script = inner.alloc_script();
                let handle = inner.alloc_function();
                inner.functions.insert(
                    handle,
                    MockFunction {
                        name: function.name.clone(),
                        arity: function.n_params,
                    },
                );
                function_scripts.push(script);
                inner.scripts.insert(
                    script,
                    MockScript {
                        filename: filename.to_owned(),
                        base_line: function.line,
                        last_line: function.body_end,
                        entry_line: function.line,
                        function: Some(handle),
                        executable: Vec::new(),
                        calls: HashMap::new(),
                    },
                );
            }

            let resolve_calls = |lines: &[u32]| -> HashMap<u32, ScriptId> {
                outline
                    .calls()
                    .iter()
                    .filter(|(line, _)| lines.contains(line))
                    .map(|&(line, index)| (line, function_scripts[index]))
                    .collect()
            };

            let toplevel_lines = outline.toplevel_lines();
            inner.scripts.insert(
                toplevel,
                MockScript {
                    filename: filename.to_owned(),
                    base_line: 1,
                    last_line: outline.last_line(),
                    entry_line: 1,
                    function: None,
                    calls: resolve_calls(&toplevel_lines),
                    executable: toplevel_lines,
                },
            );

            for (index, &script) in function_scripts.iter().enumerate() {
                let body = outline.function_lines(index);
                let calls = resolve_calls(&body);
                if let Some(s) = inner.scripts.get_mut(&script) {
                    s.executable = body;
                    s.calls = calls;
                }
            }

            (toplevel, function_scripts)
        };

        // Announce outside the borrow: the new-script hook calls back
        // into the engine to query the script it was handed
        self.announce(toplevel, filename, 1);
        for (index, function) in outline.functions().iter().enumerate() {
            self.announce(function_scripts[index], filename, function.line);
        }

        toplevel
    }

    /// Read `path` and [`Self::load_script`] its contents.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    pub fn load_script_file(&self, path: impl AsRef<Path>) -> CubrirResult<ScriptId> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)?;
        Ok(self.load_script(&path.to_string_lossy(), &source))
    }

    /// Execute a script: frame entry, one pass over its executable
    /// lines with interrupts, traps and nested calls, frame exit.
    pub fn run(&self, script: ScriptId) {
        self.exec(script, 0);
    }

    /// Release a script, notifying the destroy-script slot first.
    pub fn destroy_script(&self, script: ScriptId) {
        let hook = self.inner.borrow().destroy_script_hook.clone();
        if let Some(hook) = hook {
            hook(script);
        }
        let mut inner = self.inner.borrow_mut();
        inner.scripts.remove(&script);
        inner.single_step.remove(&script);
    }

    /// Whether debug mode is currently enabled
    #[must_use]
    pub fn debug_mode(&self) -> bool {
        self.inner.borrow().debug_mode
    }

    /// Whether single-step interrupts are enabled for `script`
    #[must_use]
    pub fn single_step_enabled(&self, script: ScriptId) -> bool {
        self.inner.borrow().single_step.contains(&script)
    }

    /// Whether a trap is installed at `(script, pc)`
    #[must_use]
    pub fn has_trap(&self, script: ScriptId, pc: Pc) -> bool {
        self.inner.borrow().traps.contains_key(&(script, pc))
    }

    fn announce(&self, script: ScriptId, filename: &str, base_line: u32) {
        let hook = self.inner.borrow().new_script_hook.clone();
        if let Some(hook) = hook {
            hook(filename, base_line, script);
        }
    }

    fn exec(&self, script: ScriptId, depth: u32) {
        if depth > MAX_CALL_DEPTH {
            return;
        }

        let Some((entry_pc, end_pc, lines)) = ({
            let inner = self.inner.borrow();
            inner.scripts.get(&script).map(|s| {
                (
                    Pc::new(s.entry_line),
                    Pc::new(s.last_line),
                    s.executable.clone(),
                )
            })
        }) else {
            return;
        };

        if let Some(hook) = self.frame_hook() {
            hook(script, entry_pc, true);
        }

        for line in lines {
            let pc = Pc::new(line);

            // Hooks registered mid-run take effect on the next line,
            // so the mode is re-read on every step
            if self.single_step_enabled(script) {
                if let Some(hook) = self.interrupt_hook() {
                    hook(script, pc);
                }
            }

            let trap = self.inner.borrow().traps.get(&(script, pc)).cloned();
            if let Some(trap) = trap {
                trap(script, pc);
            }

            let callee = self
                .inner
                .borrow()
                .scripts
                .get(&script)
                .and_then(|s| s.calls.get(&line).copied());
            if let Some(callee) = callee {
                self.exec(callee, depth + 1);
            }
        }

        if let Some(hook) = self.frame_hook() {
            hook(script, end_pc, false);
        }
    }

    fn interrupt_hook(&self) -> Option<InterruptHook> {
        self.inner.borrow().interrupt_hook.clone()
    }

    fn frame_hook(&self) -> Option<FrameHook> {
        self.inner.borrow().frame_hook.clone()
    }
}

impl Interpreter for ScriptedInterpreter {
    fn set_debug_mode(&self, enabled: bool) {
        self.inner.borrow_mut().debug_mode = enabled;
    }

    fn set_single_step(&self, script: ScriptId, enabled: bool) {
        let mut inner = self.inner.borrow_mut();
        if enabled {
            inner.single_step.insert(script);
        } else {
            inner.single_step.remove(&script);
        }
    }

    fn set_interrupt_hook(&self, hook: Option<InterruptHook>) {
        self.inner.borrow_mut().interrupt_hook = hook;
    }

    fn set_frame_hook(&self, hook: Option<FrameHook>) {
        self.inner.borrow_mut().frame_hook = hook;
    }

    fn set_script_hooks(
        &self,
        on_new: Option<NewScriptHook>,
        on_destroy: Option<DestroyScriptHook>,
    ) {
        let mut inner = self.inner.borrow_mut();
        inner.new_script_hook = on_new;
        inner.destroy_script_hook = on_destroy;
    }

    fn install_trap(&self, script: ScriptId, pc: Pc, hook: TrapHook) {
        self.inner.borrow_mut().traps.insert((script, pc), hook);
    }

    fn clear_trap(&self, script: ScriptId, pc: Pc) -> Option<TrapHook> {
        self.inner.borrow_mut().traps.remove(&(script, pc))
    }

    fn line_to_pc(&self, script: ScriptId, line: u32) -> Pc {
        let inner = self.inner.borrow();
        match inner.scripts.get(&script) {
            Some(s) => Pc::new(line.clamp(s.base_line, s.last_line)),
            None => Pc::new(line),
        }
    }

    fn pc_to_line(&self, _script: ScriptId, pc: Pc) -> u32 {
        pc.as_u32()
    }

    fn end_pc(&self, script: ScriptId) -> Pc {
        let inner = self.inner.borrow();
        Pc::new(inner.scripts.get(&script).map_or(0, |s| s.last_line))
    }

    fn script_filename(&self, script: ScriptId) -> String {
        self.inner
            .borrow()
            .scripts
            .get(&script)
            .map(|s| s.filename.clone())
            .unwrap_or_default()
    }

    fn script_base_line(&self, script: ScriptId) -> u32 {
        self.inner
            .borrow()
            .scripts
            .get(&script)
            .map_or(0, |s| s.base_line)
    }

    fn script_function(&self, script: ScriptId) -> Option<FunctionId> {
        self.inner.borrow().scripts.get(&script)?.function
    }

    fn function_name(&self, function: FunctionId) -> Option<String> {
        self.inner
            .borrow()
            .functions
            .get(&function)
            .and_then(|f| f.name.clone())
    }

    fn function_arity(&self, function: FunctionId) -> u32 {
        self.inner
            .borrow()
            .functions
            .get(&function)
            .map_or(0, |f| f.arity)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    fn rc(interp: ScriptedInterpreter) -> Rc<ScriptedInterpreter> {
        Rc::new(interp)
    }

    #[test]
    fn loading_announces_toplevel_then_functions() {
        let interp = rc(ScriptedInterpreter::new());
        let announced: Rc<RefCell<Vec<(String, u32)>>> = Rc::new(RefCell::new(Vec::new()));
        {
            let announced = Rc::clone(&announced);
            interp.set_script_hooks(
                Some(Rc::new(move |filename, base_line, _script| {
                    announced.borrow_mut().push((filename.to_owned(), base_line));
                })),
                None,
            );
        }

        interp.load_script("a.js", "let a = 1;\nfunction f() {\n    a += 1;\n}\nf();\n");

        let announced = announced.borrow();
        assert_eq!(announced.len(), 2);
        assert_eq!(announced[0], ("a.js".to_owned(), 1));
        assert_eq!(announced[1], ("a.js".to_owned(), 2));
    }

    #[test]
    fn run_wraps_each_frame_in_entry_and_exit() {
        let interp = rc(ScriptedInterpreter::new());
        let events: Rc<RefCell<Vec<(ScriptId, bool)>>> = Rc::new(RefCell::new(Vec::new()));
        {
            let events = Rc::clone(&events);
            interp.set_frame_hook(Some(Rc::new(move |script, _pc, entering| {
                events.borrow_mut().push((script, entering));
            })));
        }

        let toplevel =
            interp.load_script("a.js", "function f() {\n    let x = 1;\n}\nf();\n");
        interp.run(toplevel);

        let events = events.borrow();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], (toplevel, true));
        assert!(events[1].1);
        assert!(!events[2].1);
        assert_eq!(events[3], (toplevel, false));
        assert_ne!(events[1].0, toplevel);
    }

    #[test]
    fn interrupts_only_fire_with_single_step_enabled() {
        let interp = rc(ScriptedInterpreter::new());
        let stepped: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));
        {
            let stepped = Rc::clone(&stepped);
            interp.set_interrupt_hook(Some(Rc::new(move |_script, pc| {
                stepped.borrow_mut().push(pc.as_u32());
            })));
        }

        let toplevel = interp.load_script("a.js", "let a = 1;\nlet b = 2;\n");
        interp.run(toplevel);
        assert!(stepped.borrow().is_empty());

        interp.set_single_step(toplevel, true);
        interp.run(toplevel);
        assert_eq!(*stepped.borrow(), vec![1, 2]);
    }

    #[test]
    fn traps_fire_at_their_program_counter() {
        let interp = rc(ScriptedInterpreter::new());
        let toplevel = interp.load_script("a.js", "let a = 1;\nlet b = 2;\n");

        let hits = Rc::new(RefCell::new(0_u32));
        {
            let hits = Rc::clone(&hits);
            interp.install_trap(
                toplevel,
                Pc::new(2),
                Rc::new(move |_script, _pc| *hits.borrow_mut() += 1),
            );
        }

        interp.run(toplevel);
        assert_eq!(*hits.borrow(), 1);

        assert!(interp.clear_trap(toplevel, Pc::new(2)).is_some());
        interp.run(toplevel);
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn line_queries_clamp_to_the_script_range() {
        let interp = rc(ScriptedInterpreter::new());
        let toplevel = interp.load_script("a.js", "let a = 1;\nlet b = 2;\nlet c = 3;\n");
        assert_eq!(interp.line_to_pc(toplevel, 99).as_u32(), 3);
        assert_eq!(interp.end_pc(toplevel).as_u32(), 3);
        assert_eq!(interp.pc_to_line(toplevel, Pc::new(2)), 2);
    }
}
