//! The Grasp x-schema: a basic control net whose steps are carried out by
//! included child nets, wired together through merged interface places.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use serde_json::json;
use xschema::hierarchy::IncludeHierarchy;
use xschema::net::io::{from_json_str, from_ron_str, to_json_string, to_ron_string};
use xschema::net::{
    Arc, ComponentKind, DEFAULT_TOKEN, ExecutableNet, InterfaceFlags, InterfaceStatus, Marking,
    Net, Place, PlaceStatus, Token, Transition, weights,
};
use xschema::runner::{
    ExternalContext, FiringWriter, HandlerError, JsonParameters, RecordingObserver, RoundLog,
    Runner, StopReason, TokenChange,
};

#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.borrow().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn one() -> xschema::net::TokenCounts {
    weights(DEFAULT_TOKEN, 1)
}

fn rename_places(net: &mut Net, names: &[(&str, &str)]) {
    for (old, new) in names {
        net.rename_place(old, new).unwrap();
    }
}

fn rename_transitions(net: &mut Net, names: &[(&str, &str)]) {
    for (old, new) in names {
        net.rename_transition(old, new).unwrap();
    }
}

/// Enabled -> Prepare -> Ready -> Start -> Ongoing -> Finish -> Done
fn basic_net(name: &str) -> Net {
    let mut net = Net::new(name);
    net.add_token(Token::default()).unwrap();
    net.add_place(Place::new("P0").externally_accessible()).unwrap();
    for place in ["P1", "P2", "P3"] {
        net.add_place(Place::new(place)).unwrap();
    }
    for (i, transition) in ["T0", "T1", "T2"].into_iter().enumerate() {
        net.add_transition(Transition::immediate(transition)).unwrap();
        net.add_arc(Arc::inbound(format!("P{i}"), transition, one())).unwrap();
        net.add_arc(Arc::outbound(transition, format!("P{}", i + 1), one()))
            .unwrap();
    }
    rename_places(
        &mut net,
        &[("P0", "Enabled"), ("P1", "Ready"), ("P2", "Ongoing"), ("P3", "Done")],
    );
    rename_transitions(&mut net, &[("T0", "Prepare"), ("T1", "Start"), ("T2", "Finish")]);
    net
}

/// The basic net, plus an external `Close` step that must complete and be
/// sensed before `Finish`.
fn close_hand() -> Net {
    let mut net = basic_net("Close_hand");
    net.add_place(Place::new("P4")).unwrap();
    net.add_place(Place::new("Closing")).unwrap();
    net.add_place(Place::new("Close_sensed").externally_accessible())
        .unwrap();
    net.add_transition(Transition::external("Close", "close")).unwrap();
    net.add_arc(Arc::outbound("Start", "P4", one())).unwrap();
    net.add_arc(Arc::inbound("P4", "Close", one())).unwrap();
    net.add_arc(Arc::outbound("Close", "Closing", one())).unwrap();
    net.add_arc(Arc::inbound("Closing", "Finish", one())).unwrap();
    net.add_arc(Arc::inbound("Close_sensed", "Finish", one())).unwrap();
    net
}

fn add_suspend(net: &mut Net) {
    net.add_place(Place::new("Suspended")).unwrap();
    net.add_transition(Transition::immediate("Suspend")).unwrap();
    net.add_arc(Arc::inbound("Ongoing", "Suspend", one())).unwrap();
    net.add_arc(Arc::outbound("Suspend", "Suspended", one())).unwrap();
}

fn add_missed_input(net: &mut Net) {
    let mut missed = Place::new("Missed");
    let mut status = InterfaceStatus::default();
    status.set_external(true);
    status.set_input_only_arc_constraint(true);
    missed.set_status(PlaceStatus::Interface(status)).unwrap();
    net.add_place(missed).unwrap();
    net.add_arc(Arc::inbound("Missed", "Suspend", one())).unwrap();
}

fn mark_suspended_output_only(net: &mut Net) {
    let mut status = InterfaceStatus::default();
    status.set_external(true);
    status.set_output_only_arc_constraint(true);
    status.update().unwrap();
    net.place_mut("Suspended")
        .unwrap()
        .set_status(PlaceStatus::Interface(status))
        .unwrap();
}

/// Publishes `child.home`, materializes it in `parent` and connects it to
/// `transition` of the parent net.
fn merge_arc(parent: &mut IncludeHierarchy, child: &str, home: &str, transition: &str, inbound: bool) {
    parent
        .get_include_mut(child)
        .unwrap()
        .add_to_interface(home, ComponentKind::Place, InterfaceFlags::MERGE)
        .unwrap();
    let away = format!("{child}.{home}");
    parent.add_available_place_to_net(&away).unwrap();
    let arc = if inbound {
        Arc::inbound(&away, transition, one())
    } else {
        Arc::outbound(transition, &away, one())
    };
    parent.net_mut().unwrap().add_arc(arc).unwrap();
}

/// Replaces `Prepare` of the root net by `Pre-Prepare` / `Post-Prepare`
/// around the given children, which run in parallel.
fn expand_prepare(includes: &mut IncludeHierarchy, children: &[&str]) {
    {
        let net = includes.net_mut().unwrap();
        net.add_transition(Transition::immediate("Pre-Prepare")).unwrap();
        net.add_transition(Transition::immediate("Post-Prepare")).unwrap();
        net.add_arc(Arc::inbound("Enabled", "Pre-Prepare", one())).unwrap();
        net.add_arc(Arc::outbound("Post-Prepare", "Ready", one())).unwrap();
    }
    for child in children {
        includes.include(basic_net(&format!("{child}net")), *child).unwrap();
        merge_arc(includes, child, "Enabled", "Pre-Prepare", false);
        merge_arc(includes, child, "Done", "Post-Prepare", true);
    }
    let net = includes.net_mut().unwrap();
    net.remove_arc("Enabled TO Prepare").unwrap();
    net.remove_arc("Prepare TO Ready").unwrap();
    net.remove_transition("Prepare").unwrap();
}

fn grasp_with_close_hand() -> IncludeHierarchy {
    let mut includes = IncludeHierarchy::new(basic_net("net1"), "Grasp").unwrap();
    includes.include(close_hand(), "Close_hand").unwrap();
    merge_arc(&mut includes, "Close_hand", "Enabled", "Start", false);
    merge_arc(&mut includes, "Close_hand", "Done", "Finish", true);
    includes
}

fn add_suspension(includes: &mut IncludeHierarchy) {
    {
        let close = includes.get_include_mut("Close_hand").unwrap().net_mut().unwrap();
        add_suspend(close);
        add_missed_input(close);
    }
    {
        let root = includes.net_mut().unwrap();
        add_suspend(root);
        mark_suspended_output_only(root);
    }
    merge_arc(includes, "Close_hand", "Suspended", "Suspend", true);
}

fn mark_on_close(place: &'static str) -> impl FnMut(&mut ExternalContext) -> Result<(), HandlerError> {
    move |context: &mut ExternalContext| {
        context.mark_place(place, DEFAULT_TOKEN, 1);
        context.resolve();
        Ok(())
    }
}

fn start(runner: &mut Runner, seed: u64) -> (SharedBuffer, RoundLog) {
    let buffer = SharedBuffer::default();
    runner.add_observer(FiringWriter::new(buffer.clone()));
    let recorder = RecordingObserver::new();
    let log = recorder.log();
    runner.add_observer(recorder);
    runner.set_firing_limit(100).unwrap();
    runner.set_seed(seed);
    (buffer, log)
}

fn fired(log: &RoundLog) -> Vec<String> {
    log.borrow()
        .iter()
        .filter(|record| record.fired)
        .map(|record| record.transition.clone())
        .collect()
}

#[test]
fn basic_xschema_reports_every_round() {
    let mut runner = Runner::new(&basic_net("net1")).unwrap();
    runner.mark_place("Enabled", DEFAULT_TOKEN, 1).unwrap();
    let (report, _) = start(&mut runner, 123456);
    let outcome = runner.run().unwrap();

    assert_eq!(outcome.reason, StopReason::Quiescent);
    assert_eq!(
        report.lines(),
        vec![
            "\"Round\",\"Transition\",\"Done\",\"Enabled\",\"Ongoing\",\"Ready\"",
            "0,\"\",0,1,0,0",
            "1,\"Prepare\",0,0,0,1",
            "2,\"Start\",0,0,1,0",
            "3,\"Finish\",1,0,0,0",
        ]
    );
}

#[test]
fn close_hand_waits_for_external_close() {
    let mut runner = Runner::new(&close_hand()).unwrap();
    runner.mark_place("Enabled", DEFAULT_TOKEN, 1).unwrap();
    runner
        .set_transition_handler("Close", mark_on_close("Close_sensed"))
        .unwrap();
    let (report, _) = start(&mut runner, 123456);
    runner.run().unwrap();

    let lines = report.lines();
    assert_eq!(
        lines[0],
        "\"Round\",\"Transition\",\"Close_sensed\",\"Closing\",\"Done\",\"Enabled\",\"Ongoing\",\"P4\",\"Ready\""
    );
    assert_eq!(lines[4], "3,\"Close\",1,1,0,0,1,0,0");
    assert_eq!(lines[5], "4,\"Finish\",0,0,1,0,0,0,0");
    assert_eq!(lines.len(), 6);
}

#[test]
fn grasp_runs_close_hand_through_merged_places() {
    let mut includes = grasp_with_close_hand();
    let mut runner = Runner::from_hierarchy(&mut includes).unwrap();
    runner.mark_place("Grasp.Enabled", DEFAULT_TOKEN, 1).unwrap();
    runner
        .set_transition_handler(
            "Grasp.Close_hand.Close",
            mark_on_close("Grasp.Close_hand.Close_sensed"),
        )
        .unwrap();
    let (report, _) = start(&mut runner, 123456);
    runner.run().unwrap();

    assert_eq!(
        report.lines(),
        vec![
            "\"Round\",\"Transition\",\"Grasp.Close_hand.Close_sensed\",\"Grasp.Close_hand.Closing\",\"Grasp.Close_hand.Done\",\
             \"Grasp.Close_hand.Enabled\",\"Grasp.Close_hand.Ongoing\",\"Grasp.Close_hand.P4\",\"Grasp.Close_hand.Ready\",\"Grasp.Done\",\
             \"Grasp.Enabled\",\"Grasp.Ongoing\",\"Grasp.Ready\"",
            "0,\"\",0,0,0,0,0,0,0,0,1,0,0",
            "1,\"Grasp.Prepare\",0,0,0,0,0,0,0,0,0,0,1",
            "2,\"Grasp.Start\",0,0,0,1,0,0,0,0,0,1,0",
            "3,\"Grasp.Close_hand.Prepare\",0,0,0,0,0,0,1,0,0,1,0",
            "4,\"Grasp.Close_hand.Start\",0,0,0,0,1,1,0,0,0,1,0",
            "5,\"Grasp.Close_hand.Close\",1,1,0,0,1,0,0,0,0,1,0",
            "6,\"Grasp.Close_hand.Finish\",0,0,1,0,0,0,0,0,0,1,0",
            "7,\"Grasp.Finish\",0,0,0,0,0,0,0,1,0,0,0",
        ]
    );
}

#[test]
fn missed_close_suspends_grasp() {
    let mut includes = grasp_with_close_hand();
    add_suspension(&mut includes);
    let mut runner = Runner::from_hierarchy(&mut includes).unwrap();
    runner.mark_place("Grasp.Enabled", DEFAULT_TOKEN, 1).unwrap();
    runner
        .set_transition_handler("Grasp.Close_hand.Close", mark_on_close("Grasp.Close_hand.Missed"))
        .unwrap();
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    runner
        .listen_for_token_changes("Grasp.Suspended", move |change: &TokenChange| {
            sink.borrow_mut().push(change.clone());
        })
        .unwrap();
    let (_, log) = start(&mut runner, 123456);
    let outcome = runner.run().unwrap();

    assert_eq!(outcome.reason, StopReason::Quiescent);
    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].place, "Grasp.Suspended");
    assert_eq!(events[0].counts, weights(DEFAULT_TOKEN, 1));

    let mut fired = fired(&log);
    assert_eq!(
        fired.drain(..4).collect::<Vec<_>>(),
        vec![
            "Grasp.Prepare",
            "Grasp.Start",
            "Grasp.Close_hand.Prepare",
            "Grasp.Close_hand.Start",
        ]
    );
    fired.sort();
    assert_eq!(
        fired,
        vec!["Grasp.Close_hand.Close", "Grasp.Close_hand.Suspend", "Grasp.Suspend"]
    );
    let snapshot = runner.snapshot();
    assert_eq!(snapshot.total("Grasp.Suspended"), 1);
    assert_eq!(snapshot.total("Grasp.Close_hand.Closing"), 1);
    assert_eq!(snapshot.total("Grasp.Close_hand.Missed"), 0);
    assert_eq!(snapshot.total("Grasp.Done"), 0);
    assert!(matches!(
        runner.mark_place("Grasp.Suspended", DEFAULT_TOKEN, 0),
        Err(xschema::runner::RunnerError::NotExternallyAccessible(_))
    ));
}

fn complete_grasp() -> IncludeHierarchy {
    let mut includes = IncludeHierarchy::new(basic_net("net1"), "Grasp").unwrap();
    expand_prepare(&mut includes, &["Pre-shape", "Approach"]);
    {
        let approach = includes.get_include_mut("Approach").unwrap().net_mut().unwrap();
        approach.add_place(Place::new("P4")).unwrap();
        approach.add_transition(Transition::external("T3", "approach")).unwrap();
        approach.add_arc(Arc::outbound("Start", "P4", one())).unwrap();
        approach.add_arc(Arc::inbound("P4", "T3", one())).unwrap();
    }
    includes.include(close_hand(), "Close_hand").unwrap();
    merge_arc(&mut includes, "Close_hand", "Enabled", "Start", false);
    merge_arc(&mut includes, "Close_hand", "Done", "Finish", true);
    add_suspension(&mut includes);
    includes
}

fn complete_runner(seed: u64) -> (Runner, RoundLog) {
    let mut includes = complete_grasp();
    let mut runner = Runner::from_hierarchy(&mut includes).unwrap();
    runner.mark_place("Grasp.Enabled", DEFAULT_TOKEN, 1).unwrap();
    let parameters =
        JsonParameters::parse(r#"{"transitions":{"Grasp.Approach.T3":{"num":1}}}"#).unwrap();
    runner.load_parameters(&parameters).unwrap();
    runner.register_handler("approach", |context: &mut ExternalContext| -> Result<(), HandlerError> {
        let num = context
            .parameters()
            .and_then(|parameters| parameters["num"].as_i64())
            .ok_or("missing num")?;
        context.update_parameters(json!({ "num": num + 1 }));
        context.resolve();
        Ok(())
    });
    runner
        .set_transition_handler("Grasp.Close_hand.Close", mark_on_close("Grasp.Close_hand.Missed"))
        .unwrap();
    let (_, log) = start(&mut runner, seed);
    (runner, log)
}

#[test]
fn complete_grasp_updates_parameters_and_suspends() {
    let (mut runner, log) = complete_runner(123456);
    let outcome = runner.run().unwrap();

    assert_eq!(outcome.reason, StopReason::Quiescent);
    let mut parameters = runner.parameters();
    parameters.set_active_transition("Grasp.Approach.T3");
    assert_eq!(parameters.active_parameters(), Some(&json!({"num": 2})));

    let fired = fired(&log);
    assert_eq!(fired.first().map(String::as_str), Some("Grasp.Pre-Prepare"));
    assert!(fired.iter().any(|t| t == "Grasp.Approach.T3"));
    assert!(fired.iter().any(|t| t == "Grasp.Suspend"));
    let post = fired.iter().position(|t| t == "Grasp.Post-Prepare").unwrap();
    let pre_shape = fired.iter().position(|t| t == "Grasp.Pre-shape.Finish").unwrap();
    let approach = fired.iter().position(|t| t == "Grasp.Approach.Finish").unwrap();
    assert!(pre_shape < post && approach < post);
    assert_eq!(runner.snapshot().total("Grasp.Suspended"), 1);
}

#[test]
fn same_seed_same_run() {
    let (mut first, first_log) = complete_runner(42);
    let (mut second, second_log) = complete_runner(42);
    first.run().unwrap();
    second.run().unwrap();
    assert_eq!(*first_log.borrow(), *second_log.borrow());
}

#[test]
fn hierarchy_root_only_prefixes_ids() {
    let (mut plain, plain_log) = {
        let mut runner = Runner::new(&basic_net("net1")).unwrap();
        runner.mark_place("Enabled", DEFAULT_TOKEN, 1).unwrap();
        let (_, log) = start(&mut runner, 9);
        (runner, log)
    };
    let mut includes = IncludeHierarchy::new(basic_net("net1"), "Grasp").unwrap();
    let (mut nested, nested_log) = {
        let mut runner = Runner::from_hierarchy(&mut includes).unwrap();
        runner.mark_place("Grasp.Enabled", DEFAULT_TOKEN, 1).unwrap();
        let (_, log) = start(&mut runner, 9);
        (runner, log)
    };
    plain.run().unwrap();
    nested.run().unwrap();
    let prefixed = fired(&plain_log)
        .into_iter()
        .map(|t| format!("Grasp.{t}"))
        .collect::<Vec<_>>();
    assert_eq!(prefixed, fired(&nested_log));
}

/// Every place holds `count` tokens, so any transition can fire once.
fn saturated(exec: &ExecutableNet, count: u64) -> Marking {
    let color = exec.color_id(DEFAULT_TOKEN).unwrap();
    let mut marking = exec.initial_marking();
    for &place in exec.places_by_id() {
        marking.set_tokens(place, color, count);
    }
    marking
}

/// Nonzero token changes per place after firing `transition` once.
fn effect(exec: &ExecutableNet, marking: &Marking, transition: &str) -> Vec<(String, i64)> {
    let next = exec
        .fire_transition(marking, exec.transition_id(transition).unwrap())
        .unwrap();
    exec.places_by_id()
        .iter()
        .map(|&place| {
            let delta = next.total(place) as i64 - marking.total(place) as i64;
            (exec.place(place).id.clone(), delta)
        })
        .filter(|&(_, delta)| delta != 0)
        .collect()
}

#[test]
fn child_transitions_fire_alike_inside_the_hierarchy() {
    let alone = ExecutableNet::compile(&close_hand()).unwrap();
    let composed = ExecutableNet::compile(&grasp_with_close_hand().flatten().unwrap()).unwrap();
    let alone_marking = saturated(&alone, 10);
    let composed_marking = saturated(&composed, 10);

    let mut checked = 0;
    for (_, transition) in alone.transitions() {
        let mut expected = effect(&alone, &alone_marking, &transition.id)
            .into_iter()
            .map(|(place, delta)| (format!("Grasp.Close_hand.{place}"), delta))
            .collect::<Vec<_>>();
        let mut actual = effect(
            &composed,
            &composed_marking,
            &format!("Grasp.Close_hand.{}", transition.id),
        );
        expected.sort();
        actual.sort();
        assert!(!expected.is_empty());
        assert_eq!(actual, expected, "transition {}", transition.id);
        checked += 1;
    }
    assert_eq!(checked, 4);
}

#[test]
fn hierarchy_documents_reload() {
    let mut includes = complete_grasp();
    let mut json: IncludeHierarchy = from_json_str(&to_json_string(&includes).unwrap()).unwrap();
    let mut ron: IncludeHierarchy = from_ron_str(&to_ron_string(&includes).unwrap()).unwrap();
    let flat = includes.flatten().unwrap();
    assert_eq!(json.flatten().unwrap(), flat);
    assert_eq!(ron.flatten().unwrap(), flat);
}
