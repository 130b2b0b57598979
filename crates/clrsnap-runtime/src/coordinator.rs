//! Evaluation coordinator.
//!
//! Inspection code runs on its own thread because a function evaluation only
//! makes progress once the debugger callback returns and the runtime
//! resumes. The coordinator is the rendezvous between the runtime's
//! callback thread (which holds the suspension) and the inspection threads
//! (which walk state and may call managed getters): one mutex, two condition
//! variables, and three flags.
//!
//! The callback thread blocks inside `Break` until `debugger_can_continue`
//! is set. An inspection thread that starts an evaluation sets the flag,
//! releasing the callback; the runtime executes the call and raises
//! `EvalComplete`, whose handler signals the inspection thread and blocks
//! again. When the snapshot is done the inspection thread sets the flag one
//! last time and exits.

#![allow(missing_docs)]

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::error::DebugError;
use crate::surface::{
    EvalRef, FrameRef, RuntimeEval, RuntimeFrame, RuntimeThread, ThreadRef, TypeRef, ValueRef,
};

/// Default wall-clock budget for one managed evaluation.
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(60);

/// How long shutdown waits for inspection threads to drain.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a completed managed evaluation.
#[derive(Clone)]
pub struct EvalOutcome {
    /// Result value, or the thrown exception object when `threw` is set.
    pub value: ValueRef,
    /// Whether the evaluation completed by throwing.
    pub threw: bool,
}

impl std::fmt::Debug for EvalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalOutcome")
            .field("value", &self.value.element_type())
            .field("threw", &self.threw)
            .finish()
    }
}

/// Per-hit evaluation scratch.
///
/// Created when a breakpoint hit begins inspection, dropped when the hit is
/// continued.
#[derive(Clone)]
pub struct EvalContext {
    pub thread: ThreadRef,
    pub frame: FrameRef,
    /// Generic type parameters in scope at the frame.
    pub generics: Vec<TypeRef>,
    pub coordinator: EvalCoordinator,
}

impl EvalContext {
    #[must_use]
    pub fn new(thread: ThreadRef, frame: FrameRef, coordinator: EvalCoordinator) -> Self {
        let generics = frame.generic_args();
        Self {
            thread,
            frame,
            generics,
            coordinator,
        }
    }
}

struct CoordState {
    debugger_can_continue: bool,
    ready_to_inspect: bool,
    eval_exception: bool,
    active_thread: Option<ThreadRef>,
    shutting_down: bool,
    /// Inspections begun and not yet finished. The callback thread also
    /// unblocks when this hits zero, so a finish racing an eval completion
    /// cannot strand it.
    active_inspections: usize,
    inspectors: Vec<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<CoordState>,
    /// Wakes the callback thread waiting on `debugger_can_continue`.
    debugger_cv: Condvar,
    /// Wakes inspection threads waiting for readiness or eval completion.
    inspection_cv: Condvar,
}

/// Thread rendezvous between the debugger callback and inspection threads.
#[derive(Clone)]
pub struct EvalCoordinator {
    shared: Arc<Shared>,
    eval_timeout: Duration,
}

impl EvalCoordinator {
    #[must_use]
    pub fn new(eval_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CoordState {
                    debugger_can_continue: false,
                    ready_to_inspect: false,
                    eval_exception: false,
                    active_thread: None,
                    shutting_down: false,
                    active_inspections: 0,
                    inspectors: Vec::new(),
                }),
                debugger_cv: Condvar::new(),
                inspection_cv: Condvar::new(),
            }),
            eval_timeout,
        }
    }

    /// Open a fresh evaluation handle on the active thread.
    pub fn create_eval(&self) -> Result<EvalRef, DebugError> {
        let thread = {
            let state = self.lock();
            if state.shutting_down {
                return Err(DebugError::Shutdown);
            }
            state
                .active_thread
                .clone()
                .ok_or_else(|| DebugError::runtime("no active thread for evaluation"))?
        };
        thread.create_eval()
    }

    /// The thread the current suspension was delivered on.
    #[must_use]
    pub fn active_thread(&self) -> Option<ThreadRef> {
        self.lock().active_thread.clone()
    }

    /// Run `inspect` on a new inspection thread bound to this suspension.
    ///
    /// Called from the breakpoint callback. Blocks the calling thread until
    /// the inspection either finishes or starts an evaluation that requires
    /// the callback to return; either way the callback may then Continue.
    pub fn begin_inspection<F>(&self, thread: ThreadRef, inspect: F)
    where
        F: FnOnce(&EvalCoordinator) + Send + 'static,
    {
        let worker = {
            let coordinator = self.clone();
            std::thread::spawn(move || {
                coordinator.wait_for_ready();
                inspect(&coordinator);
                coordinator.finish_inspection();
            })
        };

        let mut state = self.lock();
        state.inspectors.retain(|handle| !handle.is_finished());
        state.inspectors.push(worker);
        state.ready_to_inspect = true;
        state.debugger_can_continue = false;
        state.active_thread = Some(thread);
        state.active_inspections += 1;
        self.shared.inspection_cv.notify_all();

        // The inspection thread releases us by requesting an eval or by
        // finishing the snapshot.
        while !state.debugger_can_continue {
            state = self
                .shared
                .debugger_cv
                .wait(state)
                .expect("coordinator state poisoned");
        }
    }

    /// Drive one managed evaluation to completion.
    ///
    /// Called from an inspection thread after the call has been started on
    /// `eval`. Releases the callback thread so the runtime can execute the
    /// call, then blocks until the completion event signals back. An
    /// evaluation that outlives the wall-clock budget is aborted and
    /// reported as [`DebugError::EvalTimeout`].
    pub fn wait_for_eval(&self, eval: &EvalRef) -> Result<EvalOutcome, DebugError> {
        let deadline = Instant::now() + self.eval_timeout;
        let mut state = self.lock();
        state.eval_exception = false;

        loop {
            if state.shutting_down {
                state.debugger_can_continue = false;
                return Err(DebugError::Shutdown);
            }
            match eval.try_result() {
                Ok(Some(value)) => {
                    // Reclaim the suspension until the next eval or the end
                    // of the snapshot.
                    state.debugger_can_continue = false;
                    let threw = state.eval_exception;
                    return Ok(EvalOutcome { value, threw });
                }
                Ok(None) => {}
                Err(err) => {
                    state.debugger_can_continue = false;
                    return Err(err);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("managed evaluation exceeded its budget, aborting");
                state.debugger_can_continue = false;
                drop(state);
                if let Err(err) = eval.abort() {
                    warn!(error = %err, "failed to abort evaluation");
                }
                return Err(DebugError::EvalTimeout);
            }

            // Wake the callback thread so the runtime can run the call.
            state.debugger_can_continue = true;
            self.shared.debugger_cv.notify_all();
            let (guard, _timeout) = self
                .shared
                .inspection_cv
                .wait_timeout(state, deadline - now)
                .expect("coordinator state poisoned");
            state = guard;
        }
    }

    /// Forward an eval-completion event from the callback thread.
    ///
    /// Stores the thread the completion was delivered on, wakes the waiting
    /// inspection thread, and blocks until the inspection releases the
    /// callback again.
    pub fn signal_eval_done(&self, thread: ThreadRef, threw: bool) {
        let mut state = self.lock();
        state.debugger_can_continue = false;
        state.active_thread = Some(thread);
        if threw {
            state.eval_exception = true;
        }
        self.shared.inspection_cv.notify_all();

        while !state.debugger_can_continue && state.active_inspections > 0 {
            state = self
                .shared
                .debugger_cv
                .wait(state)
                .expect("coordinator state poisoned");
        }
    }

    /// Whether the last completed evaluation threw.
    #[must_use]
    pub fn eval_exception_occurred(&self) -> bool {
        self.lock().eval_exception
    }

    /// Disable the coordinator and drain inspection threads.
    ///
    /// Waiters are woken with the shutdown flag set; threads still running
    /// after the bounded join window are abandoned.
    pub fn shutdown(&self) {
        let inspectors = {
            let mut state = self.lock();
            state.shutting_down = true;
            state.debugger_can_continue = true;
            self.shared.debugger_cv.notify_all();
            self.shared.inspection_cv.notify_all();
            std::mem::take(&mut state.inspectors)
        };

        let deadline = Instant::now() + SHUTDOWN_JOIN_TIMEOUT;
        for handle in inspectors {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("inspection thread did not drain before shutdown deadline");
            }
        }
        debug!("coordinator shut down");
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    fn wait_for_ready(&self) {
        let mut state = self.lock();
        while !state.ready_to_inspect && !state.shutting_down {
            state = self
                .shared
                .inspection_cv
                .wait(state)
                .expect("coordinator state poisoned");
        }
    }

    fn finish_inspection(&self) {
        let mut state = self.lock();
        state.debugger_can_continue = true;
        state.active_inspections = state.active_inspections.saturating_sub(1);
        self.shared.debugger_cv.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoordState> {
        self.shared
            .state
            .lock()
            .expect("coordinator state poisoned")
    }
}

impl std::fmt::Debug for EvalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("EvalCoordinator")
            .field("debugger_can_continue", &state.debugger_can_continue)
            .field("ready_to_inspect", &state.ready_to_inspect)
            .field("eval_exception", &state.eval_exception)
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

/// Human-readable label for a thread, for diagnostics.
#[must_use]
pub fn thread_label(thread: &ThreadRef) -> SmolStr {
    SmolStr::new(format!("thread-{}", thread.id()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::surface::{
        ArrayShape, ClassToken, ElementType, FieldToken, RawValue, RuntimeEval, RuntimeThread,
        Scalar, TypeRef, ValueRef,
    };

    struct ScalarValue(Scalar);

    impl RawValue for ScalarValue {
        fn element_type(&self) -> ElementType {
            self.0.element_type()
        }
        fn is_reference(&self) -> bool {
            false
        }
        fn is_null(&self) -> bool {
            false
        }
        fn dereference(&self) -> Result<ValueRef, DebugError> {
            Err(DebugError::runtime("not a reference"))
        }
        fn is_boxed(&self) -> bool {
            false
        }
        fn unbox(&self) -> Result<ValueRef, DebugError> {
            Err(DebugError::runtime("not boxed"))
        }
        fn exact_type(&self) -> Result<TypeRef, DebugError> {
            Err(DebugError::runtime("no type"))
        }
        fn read_scalar(&self) -> Result<Scalar, DebugError> {
            Ok(self.0)
        }
        fn string_length(&self) -> Result<u32, DebugError> {
            Err(DebugError::runtime("not a string"))
        }
        fn read_string(&self, _requested: u32) -> Result<Vec<u16>, DebugError> {
            Err(DebugError::runtime("not a string"))
        }
        fn array_shape(&self) -> Result<ArrayShape, DebugError> {
            Err(DebugError::runtime("not an array"))
        }
        fn array_element(&self, _index: u32) -> Result<ValueRef, DebugError> {
            Err(DebugError::runtime("not an array"))
        }
        fn field_value(&self, _class: ClassToken, _field: FieldToken) -> Result<ValueRef, DebugError> {
            Err(DebugError::runtime("not an object"))
        }
        fn object_address(&self) -> Option<u64> {
            None
        }
        fn create_handle(&self) -> Result<crate::handle::StrongHandle, DebugError> {
            Err(DebugError::runtime("not a heap object"))
        }
    }

    struct TestEval {
        result: StdMutex<Option<ValueRef>>,
        aborted: AtomicBool,
    }

    impl TestEval {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                result: StdMutex::new(None),
                aborted: AtomicBool::new(false),
            })
        }

        fn complete(&self, scalar: Scalar) {
            *self.result.lock().unwrap() = Some(Arc::new(ScalarValue(scalar)) as ValueRef);
        }
    }

    impl RuntimeEval for TestEval {
        fn create_value(&self, scalar: Scalar) -> Result<ValueRef, DebugError> {
            Ok(Arc::new(ScalarValue(scalar)) as ValueRef)
        }

        fn call_method(
            &self,
            _module: &crate::surface::ModuleRef,
            _method: u32,
            _args: &[ValueRef],
        ) -> Result<(), DebugError> {
            Ok(())
        }

        fn try_result(&self) -> Result<Option<ValueRef>, DebugError> {
            Ok(self.result.lock().unwrap().clone())
        }

        fn abort(&self) -> Result<(), DebugError> {
            self.aborted.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct TestThread;

    impl RuntimeThread for TestThread {
        fn id(&self) -> u32 {
            1
        }
        fn frames(&self) -> Result<Vec<crate::surface::FrameRef>, DebugError> {
            Ok(Vec::new())
        }
        fn create_eval(&self) -> Result<EvalRef, DebugError> {
            Err(DebugError::runtime("no evals on test thread"))
        }
    }

    #[test]
    fn eval_rendezvous_round_trip() {
        let coordinator = EvalCoordinator::new(Duration::from_secs(5));
        let thread: ThreadRef = Arc::new(TestThread);
        let eval = TestEval::new();
        let outcome = Arc::new(StdMutex::new(None));

        let eval_for_inspector = eval.clone();
        let outcome_for_inspector = outcome.clone();
        // Blocks until the inspector either finishes or starts an eval.
        coordinator.begin_inspection(thread.clone(), move |coordinator| {
            let eval_ref: EvalRef = eval_for_inspector;
            let result = coordinator.wait_for_eval(&eval_ref);
            *outcome_for_inspector.lock().unwrap() = Some(result);
        });

        // Back on the "callback" thread: the runtime would now execute the
        // call and deliver EvalComplete.
        eval.complete(Scalar::I4(42));
        coordinator.signal_eval_done(thread, false);

        let outcome = outcome.lock().unwrap().take().unwrap().unwrap();
        assert!(!outcome.threw);
        assert_eq!(outcome.value.read_scalar().unwrap(), Scalar::I4(42));
    }

    #[test]
    fn eval_exception_is_latched_for_the_waiter() {
        let coordinator = EvalCoordinator::new(Duration::from_secs(5));
        let thread: ThreadRef = Arc::new(TestThread);
        let eval = TestEval::new();
        let outcome = Arc::new(StdMutex::new(None));

        let eval_for_inspector = eval.clone();
        let outcome_for_inspector = outcome.clone();
        coordinator.begin_inspection(thread.clone(), move |coordinator| {
            let eval_ref: EvalRef = eval_for_inspector;
            let result = coordinator.wait_for_eval(&eval_ref);
            *outcome_for_inspector.lock().unwrap() = Some(result);
        });

        eval.complete(Scalar::I4(0));
        coordinator.signal_eval_done(thread, true);

        let outcome = outcome.lock().unwrap().take().unwrap().unwrap();
        assert!(outcome.threw);
    }

    #[test]
    fn runaway_eval_times_out_and_aborts() {
        let coordinator = EvalCoordinator::new(Duration::from_millis(50));
        let thread: ThreadRef = Arc::new(TestThread);
        let eval = TestEval::new();
        let outcome = Arc::new(StdMutex::new(None));

        let eval_for_inspector = eval.clone();
        let outcome_for_inspector = outcome.clone();
        coordinator.begin_inspection(thread, move |coordinator| {
            let eval_ref: EvalRef = eval_for_inspector;
            let result = coordinator.wait_for_eval(&eval_ref);
            *outcome_for_inspector.lock().unwrap() = Some(result);
        });

        // Nobody ever completes the eval; the inspector must time out,
        // abort, and still release the callback thread.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(result) = outcome.lock().unwrap().take() {
                assert_eq!(result.unwrap_err(), DebugError::EvalTimeout);
                break;
            }
            assert!(Instant::now() < deadline, "timed out waiting for timeout");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(eval.aborted.load(Ordering::SeqCst));
    }

    #[test]
    fn create_eval_requires_an_active_thread() {
        let coordinator = EvalCoordinator::new(DEFAULT_EVAL_TIMEOUT);
        assert!(coordinator.create_eval().is_err());
    }

    #[test]
    fn shutdown_is_idempotent_and_unblocks() {
        let coordinator = EvalCoordinator::new(DEFAULT_EVAL_TIMEOUT);
        coordinator.shutdown();
        coordinator.shutdown();
        assert!(coordinator.is_shutting_down());
        assert!(matches!(
            coordinator.create_eval(),
            Err(DebugError::Shutdown)
        ));
    }
}
