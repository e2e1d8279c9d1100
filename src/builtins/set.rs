//! Implementation of the set builtin: list, assign, erase and query shell
//! variables.

use super::prelude::*;

pub fn set(ctx: &mut BuiltinContext, streams: &mut IoStreams, argv: &mut [&str]) -> BuiltinResult {
    let cmd = argv[0];
    let args = &argv[1..];

    match args.first().copied() {
        None => {
            // List all variables in sorted order.
            for (name, value) in ctx.env.iter() {
                streams.out.appendln(format!("{name}={value}"));
            }
            Ok(SUCCESS)
        }
        Some("-e") => {
            let Some(name) = args.get(1) else {
                streams.err.append(format!("{cmd}: -e: option requires an argument\n"));
                return Err(STATUS_INVALID_ARGS);
            };
            if ctx.env.remove(name) {
                Ok(SUCCESS)
            } else {
                Err(STATUS_CMD_ERROR)
            }
        }
        Some("-q") => {
            let Some(name) = args.get(1) else {
                streams.err.append(format!("{cmd}: -q: option requires an argument\n"));
                return Err(STATUS_INVALID_ARGS);
            };
            if ctx.env.get(name).is_some() {
                Ok(SUCCESS)
            } else {
                Err(STATUS_CMD_ERROR)
            }
        }
        Some(opt) if opt.starts_with('-') => {
            streams.err.append(format!("{cmd}: {opt}: unknown option\n"));
            Err(STATUS_INVALID_ARGS)
        }
        Some(name) => {
            let value = args[1..].join(" ");
            ctx.env.set(name, value);
            Ok(SUCCESS)
        }
    }
}
