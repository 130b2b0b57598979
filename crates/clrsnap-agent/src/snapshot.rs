//! Per-hit snapshot capture.
//!
//! Runs on an inspection thread while the debuggee is held at a
//! breakpoint: evaluates the breakpoint's condition, walks the stack,
//! materialises every variable, and assembles the wire message. Any
//! per-variable or per-frame failure stays local to its node; only fatal
//! errors abort the capture.

use tracing::{debug, warn};

use clrsnap_expr::{compile_expression, evaluate_condition, parse_expression_bounded, EvalScope};
use clrsnap_object::{DescribeOptions, ObjectFactory, StackFrameView};
use clrsnap_runtime::coordinator::{EvalContext, EvalCoordinator};
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::{FrameRef, RuntimeFrame, RuntimeModule, RuntimeThread, ThreadRef};

use crate::config::AgentConfig;
use crate::protocol::{Breakpoint, SourceLocation, StackFrame, StatusMessage};
use crate::registry::DbgBreakpoint;
use crate::resolve::ResolvedSite;

/// What became of one logical breakpoint at a hit.
pub enum CaptureOutcome {
    /// Condition passed (or none): a snapshot was produced.
    Captured(Box<Breakpoint>),
    /// Condition evaluated to false; nothing is emitted.
    Skipped,
    /// The condition could not be evaluated; the breakpoint is reported
    /// with a status and no snapshot.
    ConditionError(DebugError),
}

/// Capture a snapshot for one logical breakpoint.
///
/// `Err` is reserved for failures that abort the whole hit.
pub fn capture_hit(
    thread: &ThreadRef,
    site: &ResolvedSite,
    breakpoint: &DbgBreakpoint,
    coordinator: &EvalCoordinator,
    config: &AgentConfig,
) -> Result<CaptureOutcome, DebugError> {
    let frames = match thread.frames() {
        Ok(frames) => frames,
        Err(err) => {
            if err.is_fatal() {
                return Err(err);
            }
            warn!(error = %err, "stack walk failed");
            let mut message = base_message(site, breakpoint);
            message.status = Some(StatusMessage::error(format!("stack walk failed: {err}")));
            return Ok(CaptureOutcome::Captured(Box::new(message)));
        }
    };

    if let Some(condition) = &breakpoint.condition {
        let Some(top) = frames.first() else {
            return Ok(CaptureOutcome::ConditionError(DebugError::runtime(
                "no IL frame at the suspension point",
            )));
        };
        match check_condition(condition, thread, top, coordinator, config) {
            Ok(true) => {}
            Ok(false) => {
                debug!(id = %breakpoint.id, "condition is false, skipping capture");
                return Ok(CaptureOutcome::Skipped);
            }
            Err(err) => {
                if err.is_fatal() {
                    return Err(err);
                }
                return Ok(CaptureOutcome::ConditionError(err));
            }
        }
    }

    let mut message = base_message(site, breakpoint);
    for frame in frames.iter().take(config.max_stack_frames) {
        message
            .stack_frames
            .push(capture_frame(thread, frame, coordinator, config));
    }
    if let Some(top) = message.stack_frames.first() {
        message.variables = top.locals.clone();
    }
    Ok(CaptureOutcome::Captured(Box::new(message)))
}

fn base_message(site: &ResolvedSite, breakpoint: &DbgBreakpoint) -> Breakpoint {
    Breakpoint {
        id: breakpoint.id.to_string(),
        location: SourceLocation {
            path: site.path.to_string(),
            line: site.line,
            column: breakpoint.column,
        },
        condition: breakpoint.condition.as_ref().map(ToString::to_string),
        activated: true,
        kill_server: false,
        stack_frames: Vec::new(),
        variables: Vec::new(),
        status: None,
    }
}

fn check_condition(
    condition: &str,
    thread: &ThreadRef,
    frame: &FrameRef,
    coordinator: &EvalCoordinator,
    config: &AgentConfig,
) -> Result<bool, DebugError> {
    let view = StackFrameView::new(frame)?;
    let expr = parse_expression_bounded(condition, config.ast_depth)?;
    let evaluator = compile_expression(&expr, &view)?;
    let factory = ObjectFactory::new(config.deref_depth).with_frame(frame.clone());
    let context = EvalContext::new(thread.clone(), frame.clone(), coordinator.clone());
    let scope = EvalScope {
        frame: &view,
        factory: &factory,
        context: Some(&context),
        depth: config.object_depth,
    };
    evaluate_condition(evaluator.as_ref(), &scope)
}

fn capture_frame(
    thread: &ThreadRef,
    frame: &FrameRef,
    coordinator: &EvalCoordinator,
    config: &AgentConfig,
) -> StackFrame {
    let view = match StackFrameView::new(frame) {
        Ok(view) => view,
        Err(err) => {
            return StackFrame {
                method_name: "<unknown>".to_owned(),
                location: frame_location(frame),
                locals: Vec::new(),
                arguments: Vec::new(),
                status: Some(StatusMessage::error(err.to_string())),
            };
        }
    };

    let factory = ObjectFactory::new(config.deref_depth).with_frame(frame.clone());
    let context = EvalContext::new(thread.clone(), frame.clone(), coordinator.clone());
    let options = DescribeOptions {
        factory: &factory,
        context: Some(&context),
        max_array_items: config.max_array_items,
        property_eval: config.property_eval,
    };

    let locals = view
        .locals()
        .iter()
        .map(|variable| {
            factory
                .create(&variable.value, config.object_depth)
                .describe(&variable.name, &options)
        })
        .collect();
    let arguments = view
        .arguments()
        .iter()
        .map(|variable| {
            factory
                .create(&variable.value, config.object_depth)
                .describe(&variable.name, &options)
        })
        .collect();

    StackFrame {
        method_name: view.method_name().to_string(),
        location: frame_location(frame),
        locals,
        arguments,
        status: None,
    }
}

/// Source position of a frame: the last sequence point at or before its IL
/// offset.
fn frame_location(frame: &FrameRef) -> Option<SourceLocation> {
    let module = frame.module();
    let symbols = module.symbols()?;
    for document in &symbols.documents {
        for method in &document.methods {
            if method.token != frame.method_token() {
                continue;
            }
            let line = method
                .sequence_points
                .iter()
                .filter(|point| point.il_offset <= frame.il_offset())
                .max_by_key(|point| point.il_offset)
                .map(|point| point.start_line)
                .unwrap_or(method.first_line);
            return Some(SourceLocation {
                path: document.path.to_string(),
                line,
                column: 0,
            });
        }
    }
    None
}
