//! End-to-end breakpoint scenarios against the simulated debuggee.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use clrsnap_agent::{AgentConfig, Breakpoint, DebugAgent, Variable};
use clrsnap_runtime::harness::{
    ClassBuilder, FrameBuilder, SimBehavior, SimModule, SimProcess, SimType, SimValue,
};
use clrsnap_runtime::surface::{ElementType, NativeBreakpoint, ValueRef};
use clrsnap_runtime::symbols::{PdbDocument, PdbInfo, PdbLocal, PdbMethod, SequencePoint};

struct TestBed {
    process: Arc<SimProcess>,
    module: Arc<SimModule>,
    agent: Arc<DebugAgent>,
    snapshots: Receiver<Breakpoint>,
}

/// One module, one `App.Program.Run` method covering lines 5..=40 with a
/// sequence point at the requested breakpoint line, and the given locals.
fn testbed(locals: Vec<(&str, ValueRef)>, config: AgentConfig) -> TestBed {
    let process = SimProcess::new();
    let module = SimModule::new("/work/app/bin/Debug/net8.0/App.dll");

    let program = ClassBuilder::new("App.Program")
        .method(
            "Run",
            true,
            vec![],
            (ElementType::I4, "System.Int32"),
            SimBehavior::Returns(Arc::new(|_, _| Ok(SimValue::i4(0) as ValueRef))),
        )
        .build();
    // The sim assigns method tokens; mirror the PDB onto the real one.
    let run_token = program.method_token("Run").expect("Run method registered");
    module.add_class(&program);

    module.set_symbols(PdbInfo {
        documents: vec![PdbDocument {
            path: "/work/app/Program.cs".into(),
            methods: vec![PdbMethod {
                token: run_token,
                first_line: 5,
                last_line: 40,
                sequence_points: vec![
                    SequencePoint {
                        start_line: 10,
                        end_line: 11,
                        il_offset: 0,
                    },
                    SequencePoint {
                        start_line: 14,
                        end_line: 15,
                        il_offset: 16,
                    },
                ],
                locals: locals
                    .iter()
                    .enumerate()
                    .map(|(slot, (name, _))| PdbLocal {
                        slot: slot as u32,
                        name: (*name).into(),
                        hidden: false,
                    })
                    .collect(),
            }],
        }],
    });
    process.add_module(&module);

    let thread = process.spawn_thread(1);
    let mut frame = FrameBuilder::new(&module, run_token).il_offset(16);
    for (_, value) in locals {
        frame = frame.local(value);
    }
    thread.set_frames(vec![frame.build()]);

    let (agent, snapshots) = DebugAgent::new(process.clone(), config);
    TestBed {
        process,
        module,
        agent,
        snapshots,
    }
}

fn set_and_hit(bed: &TestBed, request: &Breakpoint) {
    let response = bed.agent.apply_request(request);
    assert!(response.is_none(), "breakpoint failed to bind: {response:?}");
    let armed: Vec<_> = bed
        .module
        .armed()
        .into_iter()
        .filter(|bp| bp.is_active())
        .collect();
    assert_eq!(armed.len(), 1, "expected exactly one live arming");
    bed.process.hit_breakpoint(1, armed[0].id()).unwrap();
}

fn member<'a>(variable: &'a Variable, name: &str) -> &'a Variable {
    variable
        .members
        .iter()
        .find(|member| member.name == name)
        .unwrap_or_else(|| panic!("no member '{name}' in {variable:?}"))
}

fn local<'a>(snapshot: &'a Breakpoint, name: &str) -> &'a Variable {
    let frame = snapshot
        .stack_frames
        .first()
        .expect("snapshot carries no frames");
    frame
        .locals
        .iter()
        .find(|variable| variable.name == name)
        .unwrap_or_else(|| panic!("no local '{name}'"))
}

#[test]
fn nested_array_snapshot() {
    // int[,] m = new int[2,3]; m[1,2] = 42;
    let element = SimType::primitive(ElementType::I4);
    let mut elements: Vec<ValueRef> = (0..6).map(|_| SimValue::i4(0) as ValueRef).collect();
    elements[5] = SimValue::i4(42);
    let matrix = SimValue::array(&element, vec![2, 3], elements) as ValueRef;

    let bed = testbed(vec![("m", matrix)], AgentConfig::default());
    set_and_hit(&bed, &Breakpoint::request("bp-a", "Program.cs", 14, None));

    let snapshot = bed.snapshots.try_recv().expect("no snapshot captured");
    assert_eq!(snapshot.id, "bp-a");
    assert_eq!(snapshot.location.path, "/work/app/Program.cs");

    let m = local(&snapshot, "m");
    assert_eq!(m.type_name, "System.Int32[,]");
    assert_eq!(m.members.len(), 6);
    let corner = member(m, "[1,2]");
    assert_eq!(corner.value.as_deref(), Some("42"));
    assert_eq!(bed.process.resume_count(), 1);
}

#[test]
fn auto_property_hides_its_backing_field() {
    // class C { public string Name { get; } = "x"; } C c = new C();
    let class = ClassBuilder::new("App.C")
        .auto_property("Name", ElementType::String, "System.String")
        .build();
    let instance = class.instance(vec![(
        "<Name>k__BackingField",
        SimValue::string("x") as ValueRef,
    )]);

    let bed = testbed(vec![("c", instance)], AgentConfig::default());
    bed.module.add_class(&class);
    set_and_hit(&bed, &Breakpoint::request("bp-b", "Program.cs", 14, None));

    let snapshot = bed.snapshots.try_recv().expect("no snapshot captured");
    let c = local(&snapshot, "c");
    let names: Vec<&str> = c.members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Name"]);
    assert_eq!(member(c, "Name").value.as_deref(), Some("x"));
}

#[test]
fn throwing_getter_surfaces_a_status_without_a_value() {
    // class C { public int P { get { throw new Exception(); } } }
    let class = ClassBuilder::new("App.C")
        .property(
            "P",
            ElementType::I4,
            "System.Int32",
            SimBehavior::Throws("System.Exception".into()),
        )
        .build();
    let instance = class.instance(vec![]);

    let bed = testbed(vec![("c", instance)], AgentConfig::default());
    bed.module.add_class(&class);
    set_and_hit(&bed, &Breakpoint::request("bp-c", "Program.cs", 14, None));

    let snapshot = bed.snapshots.try_recv().expect("no snapshot captured");
    let p = member(local(&snapshot, "c"), "P");
    assert!(p.value.is_none());
    let status = p.status.as_ref().expect("status missing");
    assert!(status.is_error);
    assert!(
        status.message.contains("threw exception"),
        "unexpected status: {}",
        status.message
    );
    // Break, then one eval round trip: two Continues in total.
    assert_eq!(bed.process.resume_count(), 2);
}

#[test]
fn null_condition_short_circuits_without_touching_members() {
    // Condition `o != null && o.X > 0` with o == null: no getter runs, no
    // snapshot is captured.
    let class = ClassBuilder::new("App.O")
        .field("X", ElementType::I4, "System.Int32")
        .build();
    let null_local = SimValue::null(SimType::of_class(&class)) as ValueRef;

    let bed = testbed(vec![("o", null_local)], AgentConfig::default());
    bed.module.add_class(&class);
    set_and_hit(
        &bed,
        &Breakpoint::request("bp-d", "Program.cs", 14, Some("o != null && o.X > 0")),
    );

    assert!(bed.snapshots.try_recv().is_err(), "capture was not skipped");
    // The debuggee still continues.
    assert_eq!(bed.process.resume_count(), 1);
}

#[test]
fn shared_location_emits_one_snapshot_per_logical_breakpoint() {
    let bed = testbed(
        vec![("x", SimValue::i4(1) as ValueRef)],
        AgentConfig::default(),
    );
    assert!(bed
        .agent
        .apply_request(&Breakpoint::request("bp-1", "Program.cs", 14, None))
        .is_none());
    assert!(bed
        .agent
        .apply_request(&Breakpoint::request("bp-2", "Program.cs", 15, None))
        .is_none());

    // Both logical breakpoints share one physical arming.
    let armed = bed.module.armed();
    assert_eq!(armed.len(), 1);
    bed.process.hit_breakpoint(1, armed[0].id()).unwrap();

    let mut ids = vec![
        bed.snapshots.try_recv().unwrap().id,
        bed.snapshots.try_recv().unwrap().id,
    ];
    ids.sort();
    assert_eq!(ids, vec!["bp-1", "bp-2"]);
}

#[test]
fn int_min_division_reports_a_condition_failure() {
    let bed = testbed(
        vec![("min", SimValue::i4(i32::MIN) as ValueRef)],
        AgentConfig::default(),
    );
    set_and_hit(
        &bed,
        &Breakpoint::request("bp-f", "Program.cs", 14, Some("min / -1 > 0")),
    );

    // Not captured, but the failure is surfaced on the breakpoint itself.
    let report = bed.snapshots.try_recv().expect("no failure report");
    assert!(report.stack_frames.is_empty());
    let status = report.status.expect("status missing");
    assert!(status.is_error);
    assert!(
        status.message.contains("overflow"),
        "unexpected status: {}",
        status.message
    );
    assert_eq!(bed.process.resume_count(), 1);
}

#[test]
fn runaway_getter_times_out_and_the_debuggee_continues() {
    let class = ClassBuilder::new("App.C")
        .property(
            "Stuck",
            ElementType::I4,
            "System.Int32",
            SimBehavior::Hangs,
        )
        .build();
    let instance = class.instance(vec![]);

    let config = AgentConfig {
        eval_timeout_secs: 0,
        ..AgentConfig::default()
    };
    let bed = testbed(vec![("c", instance)], config);
    bed.module.add_class(&class);
    set_and_hit(&bed, &Breakpoint::request("bp-t", "Program.cs", 14, None));

    let snapshot = bed.snapshots.try_recv().expect("no snapshot captured");
    let stuck = member(local(&snapshot, "c"), "Stuck");
    let status = stuck.status.as_ref().expect("status missing");
    assert!(status.message.contains("timed out"));
    // The suspension was released despite the hung evaluation.
    assert!(bed.process.resume_count() >= 1);
}

#[test]
fn conditions_true_capture_and_false_skip() {
    let bed = testbed(
        vec![("x", SimValue::i4(10) as ValueRef)],
        AgentConfig::default(),
    );
    set_and_hit(
        &bed,
        &Breakpoint::request("bp-cond", "Program.cs", 14, Some("x > 5")),
    );
    let snapshot = bed.snapshots.try_recv().expect("true condition skipped");
    assert_eq!(snapshot.condition.as_deref(), Some("x > 5"));
    assert_eq!(local(&snapshot, "x").value.as_deref(), Some("10"));

    // Re-arm with a false condition on the same location.
    assert!(bed
        .agent
        .apply_request(&Breakpoint::request("bp-cond", "Program.cs", 14, Some("x > 50")))
        .is_none());
    let armed = bed.module.armed();
    bed.process.hit_breakpoint(1, armed[0].id()).unwrap();
    assert!(bed.snapshots.try_recv().is_err());
}

#[test]
fn unbindable_locations_respond_with_a_status() {
    let bed = testbed(
        vec![("x", SimValue::i4(1) as ValueRef)],
        AgentConfig::default(),
    );
    let response = bed
        .agent
        .apply_request(&Breakpoint::request("bp-u", "Program.cs", 33, None))
        .expect("unbindable set should produce a response");
    assert!(!response.activated);
    assert!(response.status.unwrap().is_error);
    assert!(bed.module.armed().is_empty());
}

#[test]
fn snapshots_capture_frame_headers() {
    let bed = testbed(
        vec![("x", SimValue::i4(1) as ValueRef)],
        AgentConfig::default(),
    );
    set_and_hit(&bed, &Breakpoint::request("bp-h", "Program.cs", 14, None));
    let snapshot = bed.snapshots.try_recv().unwrap();
    let frame = &snapshot.stack_frames[0];
    assert_eq!(frame.method_name, "Run");
    let location = frame.location.as_ref().unwrap();
    assert_eq!(location.path, "/work/app/Program.cs");
    // IL offset 16 maps back to the second sequence point.
    assert_eq!(location.line, 14);
    // Top-frame locals are mirrored into the flat variable list.
    assert_eq!(snapshot.variables.len(), 1);
}
