//! Implementation of the echo builtin.

use super::prelude::*;

#[derive(Default)]
struct Options {
    print_newline: bool,
    print_spaces: bool,
    interpret_special: bool,
}

/// Parse leading option words. Combined short options like -ne are accepted;
/// a word with any unrecognized character is treated as an operand, matching
/// traditional echo behavior.
fn parse_options(args: &[&str]) -> (Options, usize) {
    let mut opts = Options {
        print_newline: true,
        print_spaces: true,
        interpret_special: false,
    };
    let mut optind = 0;
    for arg in args {
        let Some(flags) = arg.strip_prefix('-') else {
            break;
        };
        if flags.is_empty() || !flags.chars().all(|c| "nseE".contains(c)) {
            break;
        }
        for c in flags.chars() {
            match c {
                'n' => opts.print_newline = false,
                's' => opts.print_spaces = false,
                'e' => opts.interpret_special = true,
                'E' => opts.interpret_special = false,
                _ => unreachable!(),
            }
        }
        optind += 1;
    }
    (opts, optind)
}

/// Expand backslash escapes. Unknown escapes are passed through verbatim.
fn interpret_escapes(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut chars = arg.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('e') => out.push('\x1b'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// The echo builtin: print arguments separated by spaces, followed by a
/// newline. -n suppresses the newline, -s the spaces, -e enables escape
/// interpretation and -E (the default) disables it.
pub fn echo(
    _ctx: &mut BuiltinContext,
    streams: &mut IoStreams,
    argv: &mut [&str],
) -> BuiltinResult {
    let (opts, optind) = parse_options(&argv[1..]);
    let operands = &argv[1 + optind..];

    let mut line = String::new();
    for (i, operand) in operands.iter().enumerate() {
        if i > 0 && opts.print_spaces {
            line.push(' ');
        }
        if opts.interpret_special {
            line.push_str(&interpret_escapes(operand));
        } else {
            line.push_str(operand);
        }
    }
    if opts.print_newline {
        line.push('\n');
    }
    if !streams.out.append(line) {
        return Err(STATUS_CMD_ERROR);
    }
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let (opts, optind) = parse_options(&["-ne", "hello"]);
        assert!(!opts.print_newline);
        assert!(opts.interpret_special);
        assert_eq!(optind, 1);

        // A dash word with unknown chars is an operand.
        let (opts, optind) = parse_options(&["-x", "hello"]);
        assert!(opts.print_newline);
        assert_eq!(optind, 0);
    }

    #[test]
    fn test_interpret_escapes() {
        assert_eq!(interpret_escapes(r"a\tb\n"), "a\tb\n");
        assert_eq!(interpret_escapes(r"keep\qme"), r"keep\qme");
    }
}
