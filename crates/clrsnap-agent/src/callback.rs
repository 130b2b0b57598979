//! The debugger event handler and agent assembly.

use std::io::{Read, Write};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use clrsnap_runtime::coordinator::EvalCoordinator;
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::{
    DebugCallback, ModuleRef, RuntimeController, RuntimeModule, RuntimeProcess, RuntimeThread,
    ThreadRef,
};

use crate::client::{write_framed, BreakpointClient};
use crate::config::AgentConfig;
use crate::protocol::{Breakpoint, SourceLocation, StatusMessage};
use crate::registry::{BreakpointRegistry, BreakpointSpec};
use crate::snapshot::{capture_hit, CaptureOutcome};

/// Outgoing snapshot channel, closed at shutdown so the writer drains.
type SnapshotSink = Arc<Mutex<Option<Sender<Breakpoint>>>>;

fn emit(sink: &SnapshotSink, message: Breakpoint) {
    let guard = sink.lock().expect("snapshot sink poisoned");
    if let Some(sender) = guard.as_ref() {
        if sender.send(message).is_err() {
            warn!("snapshot receiver is gone, dropping capture");
        }
    }
}

/// The snapshot agent: registry, coordinator, and event handling over one
/// attached process.
pub struct DebugAgent {
    process: Arc<dyn RuntimeProcess>,
    registry: Arc<BreakpointRegistry>,
    coordinator: EvalCoordinator,
    config: AgentConfig,
    sink: SnapshotSink,
}

impl DebugAgent {
    /// Wire an agent to a process and install its event handler. Returns
    /// the agent and the stream of captured snapshots.
    #[must_use]
    pub fn new(
        process: Arc<dyn RuntimeProcess>,
        config: AgentConfig,
    ) -> (Arc<Self>, Receiver<Breakpoint>) {
        let (tx, rx) = std::sync::mpsc::channel();
        let sink: SnapshotSink = Arc::new(Mutex::new(Some(tx)));
        let registry = Arc::new(BreakpointRegistry::new());
        let coordinator = EvalCoordinator::new(config.eval_timeout());

        let callback = Arc::new(AgentCallback {
            registry: registry.clone(),
            coordinator: coordinator.clone(),
            config: config.clone(),
            sink: sink.clone(),
        });
        process.set_callback(callback);

        let agent = Arc::new(Self {
            process,
            registry,
            coordinator,
            config,
            sink,
        });
        (agent, rx)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<BreakpointRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn coordinator(&self) -> &EvalCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Apply a set-breakpoint request from the wire. Returns a response
    /// message only when the client needs to hear about a failure.
    pub fn apply_request(&self, request: &Breakpoint) -> Option<Breakpoint> {
        let spec = BreakpointSpec {
            id: request.id.as_str().into(),
            file: request.location.path.as_str().into(),
            line: request.location.line,
            column: request.location.column,
            condition: request.condition.as_deref().map(Into::into),
            enabled: request.activated,
        };
        match self.registry.set_breakpoint(&self.process.modules(), spec) {
            Ok(outcome) if outcome.resolved => {
                debug!(id = %request.id, armed = outcome.armed, "breakpoint applied");
                None
            }
            Ok(_) => Some(Breakpoint {
                id: request.id.clone(),
                location: request.location.clone(),
                condition: request.condition.clone(),
                activated: false,
                kill_server: false,
                stack_frames: Vec::new(),
                variables: Vec::new(),
                status: Some(StatusMessage::error(
                    "no code location matches this source position",
                )),
            }),
            Err(err) => Some(Breakpoint {
                id: request.id.clone(),
                location: request.location.clone(),
                condition: request.condition.clone(),
                activated: false,
                kill_server: false,
                stack_frames: Vec::new(),
                variables: Vec::new(),
                status: Some(StatusMessage::error(err.to_string())),
            }),
        }
    }

    /// Disable arming, drain inspection threads, and close the snapshot
    /// stream.
    pub fn shutdown(&self) {
        info!("shutting down snapshot agent");
        self.registry.retire_all();
        self.coordinator.shutdown();
        self.sink.lock().expect("snapshot sink poisoned").take();
    }
}

/// The runtime's debug-callback surface. Every event path ends in a
/// Continue, or the debuggee would stall.
struct AgentCallback {
    registry: Arc<BreakpointRegistry>,
    coordinator: EvalCoordinator,
    config: AgentConfig,
    sink: SnapshotSink,
}

impl DebugCallback for AgentCallback {
    fn on_break(&self, controller: &dyn RuntimeController, thread: ThreadRef, breakpoint_id: u64) {
        let Some((site, logicals)) = self.registry.find_hit(breakpoint_id) else {
            debug!(breakpoint_id, "hit on an unknown or fully disabled arming");
            let _ = controller.resume();
            return;
        };
        if logicals.is_empty() {
            let _ = controller.resume();
            return;
        }

        let config = self.config.clone();
        let sink = self.sink.clone();
        let inspect_thread = thread.clone();
        // The inspection thread owns the capture; we block only until it
        // either finishes or needs the runtime to execute a getter.
        self.coordinator
            .begin_inspection(thread, move |coordinator| {
                for breakpoint in &logicals {
                    match capture_hit(&inspect_thread, &site, breakpoint, coordinator, &config) {
                        Ok(CaptureOutcome::Captured(message)) => emit(&sink, *message),
                        Ok(CaptureOutcome::Skipped) => {}
                        Ok(CaptureOutcome::ConditionError(err)) => {
                            warn!(id = %breakpoint.id, error = %err, "condition failed to evaluate");
                            emit(
                                &sink,
                                Breakpoint {
                                    id: breakpoint.id.to_string(),
                                    location: SourceLocation {
                                        path: site.path.to_string(),
                                        line: site.line,
                                        column: breakpoint.column,
                                    },
                                    condition: breakpoint
                                        .condition
                                        .as_ref()
                                        .map(ToString::to_string),
                                    activated: true,
                                    kill_server: false,
                                    stack_frames: Vec::new(),
                                    variables: Vec::new(),
                                    status: Some(StatusMessage::error(err.to_string())),
                                },
                            );
                        }
                        Err(err) => {
                            warn!(id = %breakpoint.id, error = %err, "snapshot aborted");
                        }
                    }
                }
            });

        let _ = controller.resume();
    }

    fn on_eval_complete(&self, controller: &dyn RuntimeController, thread: ThreadRef) {
        self.coordinator.signal_eval_done(thread, false);
        let _ = controller.resume();
    }

    fn on_eval_exception(&self, controller: &dyn RuntimeController, thread: ThreadRef) {
        self.coordinator.signal_eval_done(thread, true);
        let _ = controller.resume();
    }

    fn on_exception(&self, controller: &dyn RuntimeController, thread: ThreadRef, unhandled: bool) {
        debug!(thread = thread.id(), unhandled, "debuggee exception");
        let _ = controller.resume();
    }

    fn on_module_load(&self, controller: &dyn RuntimeController, module: ModuleRef) {
        debug!(module = %module.name(), "module loaded, re-resolving breakpoints");
        self.registry.on_module_load(&module);
        let _ = controller.resume();
    }
}

/// Serve the breakpoint channel: read set-breakpoint requests, stream
/// snapshots back, and shut down when a request carries the kill flag.
pub fn serve<R, W>(
    agent: &Arc<DebugAgent>,
    reader: R,
    mut writer: W,
    snapshots: Receiver<Breakpoint>,
) -> Result<(), DebugError>
where
    R: Read,
    W: Write + Send + 'static,
{
    let writer_thread = std::thread::spawn(move || {
        while let Ok(message) = snapshots.recv() {
            match serde_json::to_string(&message) {
                Ok(payload) => {
                    if let Err(err) = write_framed(&mut writer, &payload) {
                        warn!(error = %err, "failed to write snapshot");
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "failed to serialise snapshot"),
            }
        }
    });

    let mut client = BreakpointClient::new(ReadOnly(reader));
    let result = loop {
        match client.read_breakpoint() {
            Ok(request) => {
                if request.kill_server {
                    info!(id = %request.id, "shutdown requested over the channel");
                    break Ok(());
                }
                if let Some(response) = agent.apply_request(&request) {
                    emit(&agent.sink, response);
                }
            }
            Err(DebugError::Shutdown) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    agent.shutdown();
    if writer_thread.join().is_err() {
        warn!("snapshot writer thread panicked");
    }
    result
}

/// Adapter making a read half usable where the client wants `Read + Write`.
struct ReadOnly<R>(R);

impl<R: Read> Read for ReadOnly<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R> Write for ReadOnly<R> {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("read-only channel"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use clrsnap_runtime::harness::sample_debuggee;

    use super::*;
    use crate::client::write_framed;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn kill_server_request_retires_the_registry_and_ends_serve() {
        let (process, _module) = sample_debuggee();
        let (agent, snapshots) = DebugAgent::new(process, AgentConfig::default());

        let mut input = Vec::new();
        let request = Breakpoint::kill_server("shutdown-1");
        write_framed(&mut input, &serde_json::to_string(&request).unwrap()).unwrap();

        let output = SharedWriter(Arc::new(Mutex::new(Vec::new())));
        serve(&agent, Cursor::new(input), output, snapshots).unwrap();

        assert!(agent.registry().is_disabled());
        assert!(agent.coordinator().is_shutting_down());
    }

    #[test]
    fn eof_on_the_channel_shuts_down_cleanly() {
        let (process, _module) = sample_debuggee();
        let (agent, snapshots) = DebugAgent::new(process, AgentConfig::default());
        let output = SharedWriter(Arc::new(Mutex::new(Vec::new())));
        serve(&agent, Cursor::new(Vec::new()), output, snapshots).unwrap();
        assert!(agent.registry().is_disabled());
    }

    #[test]
    fn unresolved_requests_are_answered_with_a_status_frame() {
        let (process, _module) = sample_debuggee();
        let (agent, snapshots) = DebugAgent::new(process, AgentConfig::default());

        let mut input = Vec::new();
        let request = Breakpoint::request("bp-x", "Nowhere.cs", 3, None);
        write_framed(&mut input, &serde_json::to_string(&request).unwrap()).unwrap();

        let sink = Arc::new(Mutex::new(Vec::new()));
        serve(
            &agent,
            Cursor::new(input),
            SharedWriter(sink.clone()),
            snapshots,
        )
        .unwrap();

        let written = String::from_utf8(sink.lock().unwrap().clone()).unwrap();
        assert!(written.contains("bp-x"));
        assert!(written.contains("no code location matches"));
    }
}
