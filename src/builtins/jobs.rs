//! Implementation of the jobs builtin: print the background job table.

use super::prelude::*;

pub fn jobs(ctx: &mut BuiltinContext, streams: &mut IoStreams, argv: &mut [&str]) -> BuiltinResult {
    let _cmd = argv[0];
    let jobs = ctx.jobs.list();
    if jobs.is_empty() {
        streams.err.appendln("jobs: There are no jobs");
        return Err(STATUS_CMD_ERROR);
    }
    for job in jobs {
        let state = match job.status() {
            Some(status) => format!("exited {}", status.status_value()),
            None => "running".to_string(),
        };
        streams.out.appendln(format!(
            "Job {}, '{}' ({}, pid {})",
            job.id, job.command, state, job.pid
        ));
    }
    Ok(SUCCESS)
}
