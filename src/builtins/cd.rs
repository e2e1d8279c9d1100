//! Implementation of the cd builtin.

use super::prelude::*;
use libc::{EACCES, ELOOP, ENOENT, ENOTDIR, EPERM};
use std::path::PathBuf;

/// The cd builtin. Changes to the directory given, to $HOME with no
/// argument, or back to $OLDPWD for `cd -`. Updates the shell's logical
/// working directory plus the PWD and OLDPWD variables.
pub fn cd(ctx: &mut BuiltinContext, streams: &mut IoStreams, argv: &mut [&str]) -> BuiltinResult {
    let cmd = argv[0];

    let dir_in: String = match argv.get(1) {
        Some(&"-") => match ctx.env.get("OLDPWD") {
            Some(oldpwd) => oldpwd.to_string(),
            None => {
                streams.err.append(format!("{cmd}: OLDPWD not set\n"));
                return Err(STATUS_CMD_ERROR);
            }
        },
        Some(arg) => arg.to_string(),
        None => match ctx.env.get("HOME") {
            Some(home) if !home.is_empty() => home.to_string(),
            _ => {
                streams
                    .err
                    .append(format!("{cmd}: Could not find home directory\n"));
                return Err(STATUS_CMD_ERROR);
            }
        },
    };

    if dir_in.is_empty() {
        streams
            .err
            .append(format!("{cmd}: Empty directory '' does not exist\n"));
        return Err(STATUS_CMD_ERROR);
    }

    let target: PathBuf = ctx.env.apply_working_directory(&dir_in);

    if let Err(err) = nix::unistd::chdir(&target) {
        let msg = match err as i32 {
            ENOENT => format!("{cmd}: The directory '{dir_in}' does not exist\n"),
            ENOTDIR => format!("{cmd}: '{dir_in}' is not a directory\n"),
            ELOOP => format!("{cmd}: Too many levels of symbolic links: '{dir_in}'\n"),
            EACCES | EPERM => format!("{cmd}: Permission denied: '{dir_in}'\n"),
            _ => format!("{cmd}: Unknown error trying to locate directory '{dir_in}'\n"),
        };
        streams.err.append(msg);
        return Err(STATUS_CMD_ERROR);
    }

    // Prefer the kernel's view of where we ended up; fall back to the
    // computed path if getcwd fails (e.g. a component became unreadable).
    let new_cwd = std::env::current_dir().unwrap_or(target);
    let old_cwd = ctx.env.cwd().to_path_buf();
    ctx.env
        .set("OLDPWD", old_cwd.to_string_lossy().to_string());
    ctx.env
        .set("PWD", new_cwd.to_string_lossy().to_string());
    ctx.env.set_cwd(new_cwd);
    Ok(SUCCESS)
}
