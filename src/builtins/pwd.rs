//! Implementation of the pwd builtin.

use super::prelude::*;

// Respect -P to resolve symbolic links, -L to not do that (the default).
pub fn pwd(ctx: &mut BuiltinContext, streams: &mut IoStreams, argv: &mut [&str]) -> BuiltinResult {
    let cmd = argv[0];
    let mut resolve_symlinks = false;
    for arg in &argv[1..] {
        match *arg {
            "-L" => resolve_symlinks = false,
            "-P" => resolve_symlinks = true,
            _ => {
                streams.err.append(format!("{cmd}: {arg}: unknown option\n"));
                return Err(STATUS_INVALID_ARGS);
            }
        }
    }

    let mut pwd = ctx.env.cwd().to_path_buf();
    if resolve_symlinks {
        match std::fs::canonicalize(&pwd) {
            Ok(real) => pwd = real,
            Err(err) => {
                streams
                    .err
                    .append(format!("{cmd}: realpath failed: {err}\n"));
                return Err(STATUS_CMD_ERROR);
            }
        }
    }

    streams.out.appendln(pwd.to_string_lossy());
    Ok(SUCCESS)
}
