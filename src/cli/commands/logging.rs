use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

/// Index in this table is the stored verbosity; `error` keeps the default filter.
const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accepts `CUSTOS_LOG_LEVEL=info` as well as a plain count like `2`.
fn verbosity_parser() -> ValueParser {
    ValueParser::from(|raw: &str| -> Result<u8, String> {
        let raw = raw.trim().to_lowercase();
        if let Ok(count) = raw.parse::<u8>() {
            return Ok(count.min(4));
        }
        LEVEL_NAMES
            .iter()
            .position(|name| *name == raw)
            .and_then(|index| u8::try_from(index).ok())
            .ok_or_else(|| format!("invalid log level '{raw}', expected one of {LEVEL_NAMES:?}"))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("CUSTOS_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(verbosity_parser()),
    )
}

/// Tracing level requested on the command line, `None` for the default filter.
#[must_use]
pub fn level(matches: &ArgMatches) -> Option<Level> {
    match matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0) {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}
