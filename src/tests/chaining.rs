//! Chaining-rule properties, driven with recording builtins so no external
//! processes are involved.

use crate::builtins::shared::{BuiltinCallback, STATUS_CMD_ERROR};
use crate::exec::Executor;
use crate::proc::{ChainRule, Pipeline, Stage};
use serial_test::serial;
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<&'static str>>>;

/// A builtin that records its execution and exits with the given code.
fn recorder(log: &Log, name: &'static str, code: i32) -> BuiltinCallback {
    let log = Rc::clone(log);
    Box::new(move |_ctx, _streams, _argv| {
        log.borrow_mut().push(name);
        if code == 0 {
            Ok(crate::builtins::shared::SUCCESS)
        } else {
            Err(code)
        }
    })
}

fn executor_with(log: &Log, cmds: &[(&'static str, i32)]) -> Executor {
    let mut exec = Executor::new();
    for &(name, code) in cmds {
        exec.builtins.register(name, recorder(log, name, code));
    }
    exec
}

fn stage(name: &str) -> Stage {
    Stage::new(vec![name.to_string()])
}

#[test]
#[serial]
fn test_always_chain_runs_all_stages() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut exec = executor_with(&log, &[("a", 1), ("b", 2), ("c", 0), ("d", 3)]);

    let mut pipeline = Pipeline::new(stage("a"));
    pipeline.push(ChainRule::Always, stage("b"));
    pipeline.push(ChainRule::Always, stage("c"));
    pipeline.push(ChainRule::Always, stage("d"));

    let status = exec.run(&pipeline);
    assert_eq!(*log.borrow(), ["a", "b", "c", "d"]);
    // The last executed stage's status is the pipeline's status.
    assert_eq!(status, 3);
}

#[test]
#[serial]
fn test_on_success_runs_iff_zero() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut exec = executor_with(&log, &[("ok", 0), ("then", 0), ("fail", 1), ("never", 0)]);

    let mut pipeline = Pipeline::new(stage("ok"));
    pipeline.push(ChainRule::OnSuccess, stage("then"));
    let status = exec.run(&pipeline);
    assert_eq!(*log.borrow(), ["ok", "then"]);
    assert_eq!(status, 0);

    log.borrow_mut().clear();
    let mut pipeline = Pipeline::new(stage("fail"));
    pipeline.push(ChainRule::OnSuccess, stage("never"));
    let status = exec.run(&pipeline);
    assert_eq!(*log.borrow(), ["fail"]);
    // The skipped stage does not affect the reported status.
    assert_eq!(status, 1);
}

#[test]
#[serial]
fn test_on_failure_runs_iff_nonzero() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut exec = executor_with(&log, &[("ok", 0), ("fail", 4), ("rescue", 0)]);

    let mut pipeline = Pipeline::new(stage("fail"));
    pipeline.push(ChainRule::OnFailure, stage("rescue"));
    assert_eq!(exec.run(&pipeline), 0);
    assert_eq!(*log.borrow(), ["fail", "rescue"]);

    log.borrow_mut().clear();
    let mut pipeline = Pipeline::new(stage("ok"));
    pipeline.push(ChainRule::OnFailure, stage("rescue"));
    assert_eq!(exec.run(&pipeline), 0);
    assert_eq!(*log.borrow(), ["ok"]);
}

#[test]
#[serial]
fn test_skip_resolves_against_last_executed_stage() {
    // fail && skipped || rescue: the on-failure link is evaluated against
    // the last *executed* stage (fail), so rescue runs.
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut exec = executor_with(&log, &[("fail", 9), ("skipped", 0), ("rescue", 0)]);

    let mut pipeline = Pipeline::new(stage("fail"));
    pipeline.push(ChainRule::OnSuccess, stage("skipped"));
    pipeline.push(ChainRule::OnFailure, stage("rescue"));

    assert_eq!(exec.run(&pipeline), 0);
    assert_eq!(*log.borrow(), ["fail", "rescue"]);
}

#[test]
#[serial]
fn test_skipped_concurrent_run_is_skipped_whole() {
    // ok || (a | b); always-anchored d: the whole concurrent run linked to
    // the unsatisfied on-failure link is skipped, then d runs.
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut exec = executor_with(&log, &[("ok", 0), ("a", 0), ("b", 0), ("d", 0)]);

    let mut pipeline = Pipeline::new(stage("ok"));
    pipeline.push(ChainRule::OnFailure, stage("a"));
    pipeline.push(ChainRule::Concurrent, stage("b"));
    pipeline.push(ChainRule::Always, stage("d"));

    assert_eq!(exec.run(&pipeline), 0);
    assert_eq!(*log.borrow(), ["ok", "d"]);
}

#[test]
#[serial]
fn test_never_rule_stops_the_chain() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut exec = executor_with(&log, &[("a", 0), ("b", 0)]);

    let mut pipeline = Pipeline::new(stage("a"));
    pipeline.push(ChainRule::Never, stage("b"));

    assert_eq!(exec.run(&pipeline), 0);
    assert_eq!(*log.borrow(), ["a"]);
}

#[test]
#[serial]
fn test_registered_builtin_failure_code_propagates() {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut exec = executor_with(&log, &[("boom", STATUS_CMD_ERROR)]);
    let pipeline = Pipeline::new(stage("boom"));
    assert_eq!(exec.run(&pipeline), STATUS_CMD_ERROR);
}
