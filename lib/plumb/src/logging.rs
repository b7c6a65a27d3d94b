pub use slog::*;

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::{Build, Config, LoggerConfig};

const DEFAULT_CONFIG: &str = r#"
type = "terminal"
level = "info"
destination = "stderr"
"#;

/// Builds the root logger from an optional TOML snippet. Hosts that carry a
/// logging section in their settings pass it through here; everything else
/// gets the default terminal config.
pub fn root(config: Option<&str>) -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(config.unwrap_or(DEFAULT_CONFIG))
        .expect("Error parsing logging configuration");

    config
        .build_logger()
        .expect("Error building logger from configuration")
}

/// Terminal logger at the requested severity, for command line tools.
pub fn term(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);

    builder.build().expect("Error building terminal logger")
}

/// Logger that drops everything. Used as the fallback for components
/// constructed without a parent logger.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_default_config() {
        let _ = root(None);
    }

    #[test]
    fn test_root_custom_config() {
        let _ = root(Some(
            r#"
            type = "terminal"
            level = "debug"
            destination = "stderr"
            "#,
        ));
    }

    #[test]
    fn test_discard_accepts_records() {
        let log = discard();
        info!(log, "dropped"; "key" => 1);
    }
}
