//! Simulated debuggee process, threads, frames, and evaluations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::DebugError;
use crate::surface::{
    ClassToken, DebugCallback, ElementType, FieldToken, FrameRef, MethodToken, ModuleRef,
    RuntimeController, RuntimeEval, RuntimeFrame, RuntimeModule, RuntimeProcess, RuntimeThread,
    TypeRef, ValueRef,
};
use crate::symbols::{PdbDocument, PdbInfo, PdbLocal, PdbMethod, SequencePoint};

use super::module::{static_field, ClassBuilder, SimBehavior, SimModule};
use super::value::SimValue;

/// Safety cap so a hanging simulated eval cannot wedge a test run.
const HANG_CAP: Duration = Duration::from_secs(10);

type PendingQueue = Arc<Mutex<VecDeque<Arc<SimEval>>>>;
type ModuleList = Arc<Mutex<Vec<Arc<SimModule>>>>;

struct StartedCall {
    behavior: SimBehavior,
    this: Option<ValueRef>,
    args: Vec<ValueRef>,
}

struct EvalState {
    started: Option<StartedCall>,
    completed: bool,
    result: Option<ValueRef>,
    aborted: bool,
}

/// Simulated function-evaluation handle.
pub struct SimEval {
    me: Weak<SimEval>,
    queue: PendingQueue,
    modules: ModuleList,
    state: Mutex<EvalState>,
    cv: Condvar,
}

impl SimEval {
    /// Run the started call. Returns `(threw)`; the pump turns that into
    /// the matching completion callback.
    fn execute(&self) -> bool {
        let started = {
            let mut state = self.state.lock().expect("sim eval poisoned");
            state.started.take()
        };
        let Some(call) = started else {
            return false;
        };

        match call.behavior {
            SimBehavior::Returns(body) => match body(call.this.as_ref(), &call.args) {
                Ok(value) => {
                    self.complete(Some(value), false);
                    false
                }
                Err(exception_type) => {
                    self.complete(Some(SimValue::exception(&exception_type) as ValueRef), false);
                    true
                }
            },
            SimBehavior::Throws(exception_type) => {
                self.complete(Some(SimValue::exception(&exception_type) as ValueRef), false);
                true
            }
            SimBehavior::Hangs => {
                let mut state = self.state.lock().expect("sim eval poisoned");
                let deadline = std::time::Instant::now() + HANG_CAP;
                while !state.aborted {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = self
                        .cv
                        .wait_timeout(state, deadline - now)
                        .expect("sim eval poisoned");
                    state = guard;
                }
                state.completed = true;
                state.aborted = true;
                false
            }
        }
    }

    fn complete(&self, result: Option<ValueRef>, aborted: bool) {
        let mut state = self.state.lock().expect("sim eval poisoned");
        state.completed = true;
        state.result = result;
        state.aborted = aborted;
    }
}

impl RuntimeEval for SimEval {
    fn create_value(
        &self,
        scalar: crate::surface::Scalar,
    ) -> Result<ValueRef, DebugError> {
        Ok(SimValue::scalar(scalar) as ValueRef)
    }

    fn call_method(
        &self,
        module: &ModuleRef,
        method: MethodToken,
        args: &[ValueRef],
    ) -> Result<(), DebugError> {
        let module_name = module.name();
        let behavior = {
            let modules = self.modules.lock().expect("sim process poisoned");
            modules
                .iter()
                .find(|candidate| candidate.name() == module_name)
                .and_then(|candidate| candidate.behavior_of(method))
        };
        let (info, behavior) =
            behavior.ok_or_else(|| DebugError::runtime("unknown method token for eval"))?;

        let (this, rest) = if info.is_static {
            (None, args.to_vec())
        } else {
            let mut args = args.to_vec();
            if args.is_empty() {
                return Err(DebugError::runtime("instance call without receiver"));
            }
            let this = args.remove(0);
            (Some(this), args)
        };

        {
            let mut state = self.state.lock().expect("sim eval poisoned");
            if state.started.is_some() {
                return Err(DebugError::runtime("eval already started"));
            }
            state.started = Some(StartedCall {
                behavior,
                this,
                args: rest,
            });
        }

        let me = self
            .me
            .upgrade()
            .ok_or_else(|| DebugError::internal("eval outlived its handle"))?;
        self.queue
            .lock()
            .expect("sim thread poisoned")
            .push_back(me);
        Ok(())
    }

    fn try_result(&self) -> Result<Option<ValueRef>, DebugError> {
        let state = self.state.lock().expect("sim eval poisoned");
        if !state.completed {
            return Ok(None);
        }
        if state.aborted {
            return Err(DebugError::EvalAborted);
        }
        state
            .result
            .clone()
            .map(Some)
            .ok_or_else(|| DebugError::internal("completed eval without result"))
    }

    fn abort(&self) -> Result<(), DebugError> {
        let mut state = self.state.lock().expect("sim eval poisoned");
        state.aborted = true;
        self.cv.notify_all();
        Ok(())
    }
}

/// Simulated debuggee thread.
pub struct SimThread {
    id: u32,
    frames: Mutex<Vec<FrameRef>>,
    pending: PendingQueue,
    modules: ModuleList,
}

impl SimThread {
    /// Replace the thread's stack, innermost frame first.
    pub fn set_frames(&self, frames: Vec<FrameRef>) {
        *self.frames.lock().expect("sim thread poisoned") = frames;
    }

    fn pop_pending(&self) -> Option<Arc<SimEval>> {
        self.pending.lock().expect("sim thread poisoned").pop_front()
    }
}

impl RuntimeThread for SimThread {
    fn id(&self) -> u32 {
        self.id
    }

    fn frames(&self) -> Result<Vec<FrameRef>, DebugError> {
        Ok(self.frames.lock().expect("sim thread poisoned").clone())
    }

    fn create_eval(&self) -> Result<crate::surface::EvalRef, DebugError> {
        let queue = self.pending.clone();
        let modules = self.modules.clone();
        let eval = Arc::new_cyclic(|me| SimEval {
            me: me.clone(),
            queue,
            modules,
            state: Mutex::new(EvalState {
                started: None,
                completed: false,
                result: None,
                aborted: false,
            }),
            cv: Condvar::new(),
        });
        Ok(eval)
    }
}

/// Simulated IL frame.
pub struct SimFrame {
    method: MethodToken,
    module: Arc<SimModule>,
    il_offset: u32,
    locals: Vec<ValueRef>,
    args: Vec<ValueRef>,
    generics: Vec<TypeRef>,
}

impl RuntimeFrame for SimFrame {
    fn method_token(&self) -> MethodToken {
        self.method
    }

    fn module(&self) -> ModuleRef {
        self.module.clone()
    }

    fn il_offset(&self) -> u32 {
        self.il_offset
    }

    fn locals(&self) -> Result<Vec<ValueRef>, DebugError> {
        Ok(self.locals.clone())
    }

    fn arguments(&self) -> Result<Vec<ValueRef>, DebugError> {
        Ok(self.args.clone())
    }

    fn static_field_value(
        &self,
        class: ClassToken,
        field: FieldToken,
    ) -> Result<ValueRef, DebugError> {
        static_field(&self.module, class, field)
    }

    fn generic_args(&self) -> Vec<TypeRef> {
        self.generics.clone()
    }
}

/// Builder for simulated frames.
pub struct FrameBuilder {
    method: MethodToken,
    module: Arc<SimModule>,
    il_offset: u32,
    locals: Vec<ValueRef>,
    args: Vec<ValueRef>,
    generics: Vec<TypeRef>,
}

impl FrameBuilder {
    #[must_use]
    pub fn new(module: &Arc<SimModule>, method: MethodToken) -> Self {
        Self {
            method,
            module: module.clone(),
            il_offset: 0,
            locals: Vec::new(),
            args: Vec::new(),
            generics: Vec::new(),
        }
    }

    #[must_use]
    pub fn il_offset(mut self, offset: u32) -> Self {
        self.il_offset = offset;
        self
    }

    #[must_use]
    pub fn local(mut self, value: ValueRef) -> Self {
        self.locals.push(value);
        self
    }

    #[must_use]
    pub fn arg(mut self, value: ValueRef) -> Self {
        self.args.push(value);
        self
    }

    #[must_use]
    pub fn generic(mut self, arg: TypeRef) -> Self {
        self.generics.push(arg);
        self
    }

    #[must_use]
    pub fn build(self) -> FrameRef {
        Arc::new(SimFrame {
            method: self.method,
            module: self.module,
            il_offset: self.il_offset,
            locals: self.locals,
            args: self.args,
            generics: self.generics,
        })
    }
}

/// Continue surface counting resumes.
pub struct SimController {
    resumes: Arc<AtomicU64>,
}

impl RuntimeController for SimController {
    fn resume(&self) -> Result<(), DebugError> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Simulated debuggee process and event pump.
///
/// Tests drive it directly: build modules, classes, threads, and frames,
/// install the agent's callback, then call [`SimProcess::hit_breakpoint`].
/// The pump mirrors the runtime's behaviour at a suspension: it delivers
/// `Break`, and once the callback returns it executes any function
/// evaluation started meanwhile and delivers the completion event, until
/// the inspection lets the debuggee run free.
pub struct SimProcess {
    modules: ModuleList,
    threads: Mutex<FxHashMap<u32, Arc<SimThread>>>,
    callback: Mutex<Option<Arc<dyn DebugCallback>>>,
    resumes: Arc<AtomicU64>,
}

impl SimProcess {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            modules: Arc::new(Mutex::new(Vec::new())),
            threads: Mutex::new(FxHashMap::default()),
            callback: Mutex::new(None),
            resumes: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn add_module(&self, module: &Arc<SimModule>) {
        self.modules
            .lock()
            .expect("sim process poisoned")
            .push(module.clone());
    }

    /// Create a thread with an empty stack.
    pub fn spawn_thread(&self, id: u32) -> Arc<SimThread> {
        let thread = Arc::new(SimThread {
            id,
            frames: Mutex::new(Vec::new()),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            modules: self.modules.clone(),
        });
        self.threads
            .lock()
            .expect("sim process poisoned")
            .insert(id, thread.clone());
        thread
    }

    /// Number of Continue calls the agent has issued.
    #[must_use]
    pub fn resume_count(&self) -> u64 {
        self.resumes.load(Ordering::SeqCst)
    }

    fn controller(&self) -> SimController {
        SimController {
            resumes: self.resumes.clone(),
        }
    }

    fn callback(&self) -> Result<Arc<dyn DebugCallback>, DebugError> {
        self.callback
            .lock()
            .expect("sim process poisoned")
            .clone()
            .ok_or_else(|| DebugError::internal("no callback installed"))
    }

    /// Deliver a breakpoint hit and pump evaluations to completion.
    pub fn hit_breakpoint(&self, thread_id: u32, breakpoint_id: u64) -> Result<(), DebugError> {
        let callback = self.callback()?;
        let thread = self
            .threads
            .lock()
            .expect("sim process poisoned")
            .get(&thread_id)
            .cloned()
            .ok_or_else(|| DebugError::internal("unknown sim thread"))?;

        debug!(thread_id, breakpoint_id, "sim: delivering break");
        callback.on_break(&self.controller(), thread.clone(), breakpoint_id);

        // The callback returned, so the runtime is free to run. Execute any
        // evaluation the inspection started, deliver its completion, and
        // repeat until the inspection stops asking.
        while let Some(eval) = thread.pop_pending() {
            let threw = eval.execute();
            if threw {
                callback.on_eval_exception(&self.controller(), thread.clone());
            } else {
                callback.on_eval_complete(&self.controller(), thread.clone());
            }
        }
        Ok(())
    }

    /// Deliver a debuggee exception event.
    pub fn raise_exception(&self, thread_id: u32, unhandled: bool) -> Result<(), DebugError> {
        let callback = self.callback()?;
        let thread = self
            .threads
            .lock()
            .expect("sim process poisoned")
            .get(&thread_id)
            .cloned()
            .ok_or_else(|| DebugError::internal("unknown sim thread"))?;
        callback.on_exception(&self.controller(), thread, unhandled);
        Ok(())
    }

    /// Deliver a module-load event.
    pub fn notify_module_load(&self, module: &Arc<SimModule>) -> Result<(), DebugError> {
        let callback = self.callback()?;
        callback.on_module_load(&self.controller(), module.clone());
        Ok(())
    }
}

impl RuntimeProcess for SimProcess {
    fn modules(&self) -> Vec<ModuleRef> {
        self.modules
            .lock()
            .expect("sim process poisoned")
            .iter()
            .map(|module| module.clone() as ModuleRef)
            .collect()
    }

    fn set_callback(&self, callback: Arc<dyn DebugCallback>) {
        *self.callback.lock().expect("sim process poisoned") = Some(callback);
    }
}

/// A small canned debuggee: one module, one class, one suspended thread.
///
/// Used by the demo binary and by doc examples; tests usually build their
/// own shapes instead.
#[must_use]
pub fn sample_debuggee() -> (Arc<SimProcess>, Arc<SimModule>) {
    let process = SimProcess::new();
    let module = SimModule::new("/app/bin/Debug/net8.0/Sample.dll");

    let greeter = ClassBuilder::new("Sample.Greeter")
        .field("count", ElementType::I4, "System.Int32")
        .field("message", ElementType::String, "System.String")
        .auto_property("Label", ElementType::String, "System.String")
        .method(
            "Greet",
            false,
            Vec::new(),
            (ElementType::String, "System.String"),
            SimBehavior::Returns(std::sync::Arc::new(|_, _| Ok(SimValue::string("hi") as _))),
        )
        .build();
    module.add_class(&greeter);

    let greet_token = greeter.method_token("Greet").expect("Greet registered");
    module.set_symbols(PdbInfo {
        documents: vec![PdbDocument {
            path: "/src/Sample/Program.cs".into(),
            methods: vec![PdbMethod {
                token: greet_token,
                first_line: 10,
                last_line: 24,
                sequence_points: vec![
                    SequencePoint {
                        start_line: 12,
                        end_line: 12,
                        il_offset: 0,
                    },
                    SequencePoint {
                        start_line: 14,
                        end_line: 15,
                        il_offset: 8,
                    },
                    SequencePoint {
                        start_line: 18,
                        end_line: 18,
                        il_offset: 20,
                    },
                ],
                locals: vec![PdbLocal {
                    slot: 0,
                    name: "greeter".into(),
                    hidden: false,
                }],
            }],
        }],
    });
    process.add_module(&module);

    let thread = process.spawn_thread(1);
    let instance = greeter.instance(vec![
        ("count", SimValue::i4(3)),
        ("message", SimValue::string("hello")),
        ("<Label>k__BackingField", SimValue::string("greeter")),
    ]);
    thread.set_frames(vec![FrameBuilder::new(&module, greet_token)
        .il_offset(8)
        .local(instance)
        .build()]);

    (process, module)
}
