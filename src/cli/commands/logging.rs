use clap::{builder::ValueParser, Arg, ArgAction, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// `-v` occurrences, or a level from `TESSERA_LOG_LEVEL` given either by name
/// or as its count (`info` and `2` are the same).
fn parse_level(level: &str) -> Result<u8, String> {
    let level = level.trim().to_ascii_lowercase();

    if let Ok(count) = level.parse::<u8>() {
        return if usize::from(count) < LEVELS.len() {
            Ok(count)
        } else {
            Err(format!("log level count must be below {}", LEVELS.len()))
        };
    }

    LEVELS
        .iter()
        .position(|name| *name == level)
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| format!("unknown log level {level:?}, expected one of {}", LEVELS.join(", ")))
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::new(parse_level)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Log level: repeat -v, or set TESSERA_LOG_LEVEL to error, warn, info, debug or trace")
            .env("TESSERA_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_counts_agree() {
        for (count, name) in LEVELS.iter().enumerate() {
            let count = u8::try_from(count).unwrap_or(u8::MAX);
            assert_eq!(parse_level(name), Ok(count));
            assert_eq!(parse_level(&name.to_uppercase()), Ok(count));
            assert_eq!(parse_level(&count.to_string()), Ok(count));
        }
    }

    #[test]
    fn rejects_unknown_levels() {
        assert!(parse_level("verbose").is_err());
        assert!(parse_level("5").is_err());
    }

    #[test]
    fn repeated_flag_counts() {
        temp_env::with_vars([("TESSERA_LOG_LEVEL", None::<&str>)], || {
            let matches = with_args(Command::new("tessera")).get_matches_from(["tessera", "-vvv"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
    }
}
