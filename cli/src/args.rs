use std::path::PathBuf;

/// A parsed `jig20` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run one scenario to completion and exit with its result.
    Run {
        manifest: PathBuf,
        jig: Option<String>,
        scenario: Option<String>,
    },
    /// Load the jig, start its endpoint programs and serve until told to stop.
    Serve {
        manifest: PathBuf,
        jig: Option<String>,
    },
    /// Print the scenarios usable on a jig.
    Scenarios {
        manifest: PathBuf,
        jig: Option<String>,
    },
    /// Print a scenario's tests in execution order.
    Tests {
        manifest: PathBuf,
        jig: Option<String>,
        scenario: String,
    },
    Help,
}

/// Parse arguments without the program name.
pub fn parse_args(args: &[&str]) -> Result<Command, String> {
    if args.is_empty() {
        return Err("No command specified. Run 'jig20 help' for usage.".into());
    }

    match args[0] {
        "run" => parse_run(args),
        "serve" => parse_serve(args),
        "scenarios" => parse_scenarios(args),
        "tests" => parse_tests(args),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => Err(format!("Unknown command: '{}'", args[0])),
    }
}

pub const USAGE: &str = "\
Usage:
  jig20 run <manifest> [--jig <name>] [--scenario <name>]
  jig20 serve <manifest> [--jig <name>]
  jig20 scenarios <manifest> [--jig <name>]
  jig20 tests <manifest> <scenario> [--jig <name>]";

// ---------------------------------------------------------------------------
// Sub-parsers
// ---------------------------------------------------------------------------

/// `jig20 run <manifest> [--jig J] [--scenario S]`
fn parse_run(args: &[&str]) -> Result<Command, String> {
    let (positional, flags) = split_flags(&args[1..])?;
    let manifest = manifest_arg(&positional, "Usage: jig20 run <manifest>")?;
    Ok(Command::Run {
        manifest,
        jig: flag(&flags, "--jig"),
        scenario: flag(&flags, "--scenario"),
    })
}

/// `jig20 serve <manifest> [--jig J]`
fn parse_serve(args: &[&str]) -> Result<Command, String> {
    let (positional, flags) = split_flags(&args[1..])?;
    let manifest = manifest_arg(&positional, "Usage: jig20 serve <manifest>")?;
    Ok(Command::Serve {
        manifest,
        jig: flag(&flags, "--jig"),
    })
}

/// `jig20 scenarios <manifest> [--jig J]`
fn parse_scenarios(args: &[&str]) -> Result<Command, String> {
    let (positional, flags) = split_flags(&args[1..])?;
    let manifest = manifest_arg(&positional, "Usage: jig20 scenarios <manifest>")?;
    Ok(Command::Scenarios {
        manifest,
        jig: flag(&flags, "--jig"),
    })
}

/// `jig20 tests <manifest> <scenario> [--jig J]`
fn parse_tests(args: &[&str]) -> Result<Command, String> {
    let (positional, flags) = split_flags(&args[1..])?;
    if positional.len() < 2 {
        return Err("Usage: jig20 tests <manifest> <scenario>".into());
    }
    Ok(Command::Tests {
        manifest: PathBuf::from(positional[0]),
        jig: flag(&flags, "--jig"),
        scenario: positional[1].to_string(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Separate `--name value` pairs from positional arguments.
fn split_flags<'a>(args: &[&'a str]) -> Result<(Vec<&'a str>, Vec<(&'a str, &'a str)>), String> {
    let mut positional = Vec::new();
    let mut flags = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i];
        if arg.starts_with("--") {
            match arg {
                "--jig" | "--scenario" => {
                    let value = args
                        .get(i + 1)
                        .ok_or_else(|| format!("{} requires a value", arg))?;
                    flags.push((arg, *value));
                    i += 2;
                }
                _ => return Err(format!("Unknown flag: '{}'", arg)),
            }
        } else {
            positional.push(arg);
            i += 1;
        }
    }
    Ok((positional, flags))
}

fn manifest_arg(positional: &[&str], usage: &str) -> Result<PathBuf, String> {
    positional
        .first()
        .map(PathBuf::from)
        .ok_or_else(|| usage.to_string())
}

fn flag(flags: &[(&str, &str)], name: &str) -> Option<String> {
    flags
        .iter()
        .rev()
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_with_flags() {
        let cmd = parse_args(&["run", "units.yaml", "--scenario", "smoke", "--jig", "bench"]).unwrap();
        assert_eq!(
            cmd,
            Command::Run {
                manifest: PathBuf::from("units.yaml"),
                jig: Some("bench".into()),
                scenario: Some("smoke".into()),
            }
        );
    }

    #[test]
    fn run_needs_manifest() {
        assert!(parse_args(&["run"]).is_err());
        assert!(parse_args(&["run", "--jig"]).is_err());
    }

    #[test]
    fn tests_needs_scenario() {
        assert!(parse_args(&["tests", "units.yaml"]).is_err());
        let cmd = parse_args(&["tests", "units.yaml", "smoke"]).unwrap();
        assert!(matches!(cmd, Command::Tests { ref scenario, .. } if scenario == "smoke"));
    }

    #[test]
    fn unknown_command_and_flag() {
        assert_eq!(parse_args(&["dance"]).unwrap_err(), "Unknown command: 'dance'");
        assert!(parse_args(&["serve", "u.yaml", "--verbose"]).is_err());
        assert!(parse_args(&[]).is_err());
    }
}
