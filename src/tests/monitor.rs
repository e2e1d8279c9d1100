//! Environment-capture monitor scenarios, driven by the scripted observer
//! (plus one end-to-end run with the native observer where available).

use crate::env::{ShellEnv, ALIAS_VAR_PREFIX};
use crate::monitor::{
    apply_captured, CapturedState, DebugEvent, EnvCaptureMonitor, ScriptedObserver,
};
use crate::proc::{Pid, ProcStatus};
use std::io;
use std::path::PathBuf;

fn pid(n: i32) -> Pid {
    Pid::new(n)
}

#[test]
fn test_monitor_applies_final_state_only() {
    // The child spawns a descendant, loads a module, the descendant exits,
    // then the original exits: only the state captured at the original's
    // exit is applied, never anything intermediate.
    let final_state = CapturedState {
        vars: vec![
            ("MARKER".to_string(), "final".to_string()),
            (format!("{ALIAS_VAR_PREFIX}ll"), "ls -la".to_string()),
        ],
        cwd: Some(PathBuf::from("/somewhere/else")),
    };
    let events = vec![
        DebugEvent::ProcessCreated { pid: pid(100) },
        DebugEvent::ModuleLoaded { pid: pid(100) },
        DebugEvent::ProcessCreated { pid: pid(101) },
        DebugEvent::ProcessExited {
            pid: pid(101),
            status: ProcStatus::from_exit_code(0),
        },
        DebugEvent::ProcessExited {
            pid: pid(100),
            status: ProcStatus::from_exit_code(0),
        },
    ];
    let observer = ScriptedObserver::new(events, Ok(final_state));
    let result = EnvCaptureMonitor::new(Box::new(observer), pid(100)).run();

    assert!(result.status.is_success());
    let captured = result.captured.expect("extraction should have run");

    let mut env = ShellEnv::empty_at("/home/original");
    env.set("STALE", "gone-after-apply");
    env.set_alias("ll", "ls -l");
    apply_captured(&mut env, &captured);

    assert_eq!(env.get("MARKER"), Some("final"));
    assert_eq!(env.get("STALE"), None);
    assert_eq!(env.alias("ll"), Some("ls -la"));
    assert_eq!(env.cwd(), std::path::Path::new("/somewhere/else"));
}

#[test]
fn test_monitor_extraction_failure_applies_nothing() {
    let events = vec![
        DebugEvent::ProcessCreated { pid: pid(7) },
        DebugEvent::ProcessExited {
            pid: pid(7),
            status: ProcStatus::from_exit_code(0),
        },
    ];
    let observer = ScriptedObserver::new(
        events,
        Err(io::Error::from(io::ErrorKind::PermissionDenied)),
    );
    let result = EnvCaptureMonitor::new(Box::new(observer), pid(7)).run();

    // The failure is silent: the status is still reported, nothing captured.
    assert!(result.status.is_success());
    assert!(result.captured.is_none());
}

#[test]
fn test_monitor_reports_exit_status_of_original() {
    let events = vec![
        DebugEvent::ProcessCreated { pid: pid(9) },
        DebugEvent::ProcessExited {
            pid: pid(9),
            status: ProcStatus::from_exit_code(5),
        },
    ];
    let observer = ScriptedObserver::new(events, Ok(CapturedState::default()));
    let result = EnvCaptureMonitor::new(Box::new(observer), pid(9)).run();
    assert_eq!(result.status.status_value(), 5);
}

#[test]
fn test_monitor_drained_channel_means_no_capture() {
    // A degraded observer (no observation channel) reports nothing; the
    // monitor completes without applying anything.
    let observer = ScriptedObserver::new(Vec::new(), Ok(CapturedState::default()));
    let result = EnvCaptureMonitor::new(Box::new(observer), pid(3)).run();
    assert!(result.captured.is_none());
}

#[cfg(target_os = "linux")]
mod native {
    use crate::exec::Executor;
    use crate::proc::{Pipeline, Stage, StageFlags};
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_monitored_child_propagates_cwd_and_environment() {
        let mut exec = Executor::new();
        exec.env.set("REMORA_MONITOR_MARKER", "carried");

        let mut st = Stage::new(vec!["/bin/sh".into(), "-c".into(), "cd /".into()]);
        st.flags = StageFlags::WAIT | StageFlags::MONITOR_ENV;
        let status = exec.run(&Pipeline::new(st));
        assert_eq!(status, 0);

        // The child's final working directory was applied to the shell, and
        // the environment round-tripped through extraction.
        assert_eq!(exec.env.cwd(), std::path::Path::new("/"));
        assert_eq!(exec.env.get("REMORA_MONITOR_MARKER"), Some("carried"));
    }

    #[test]
    #[serial]
    fn test_monitored_child_tracks_descendants() {
        // The child forks a grandchild; the monitor must match each exit to
        // its own record and still complete on the original's exit.
        let mut exec = Executor::new();
        let mut st = Stage::new(vec![
            "/bin/sh".into(),
            "-c".into(),
            "(sleep 0.05; exit 0) & wait".into(),
        ]);
        st.flags = StageFlags::WAIT | StageFlags::MONITOR_ENV;
        let status = exec.run(&Pipeline::new(st));
        assert_eq!(status, 0);
    }
}
