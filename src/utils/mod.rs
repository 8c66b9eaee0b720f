//! Utilities: logging setup (level from -v/-q, `RUST_LOG` override) and small
//! terminal helpers shared by the subcommands.
//!
//! Key items:
//!   init_logging / derive_level
//!   stdin_is_terminal / confirm

/// Logging helpers.
pub mod logging {
    use tracing_subscriber::EnvFilter;

    #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
    pub enum LogLevel {
        Error = 0,
        Warn = 1,
        Debug = 2,
        Trace = 3,
    }

    impl LogLevel {
        pub fn as_str(&self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }
    }

    pub fn derive_level(verbose: u8, quiet: bool) -> LogLevel {
        if quiet {
            return LogLevel::Error;
        }
        match verbose {
            0 => LogLevel::Warn,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Install the global subscriber. Logs go to stderr so they never mix with
    /// a target's stdout. `RUST_LOG`, when set, wins over `level`.
    pub fn init_logging(level: LogLevel) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(format!("tu={}", level.as_str()))
        };

        // Ignore error if a subscriber is already set (e.g. in tests).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn level_from_flags() {
            assert_eq!(derive_level(0, false), LogLevel::Warn);
            assert_eq!(derive_level(1, false), LogLevel::Debug);
            assert_eq!(derive_level(5, false), LogLevel::Trace);
            assert_eq!(derive_level(2, true), LogLevel::Error);
        }
    }
}

pub use logging::{derive_level, init_logging};

/// Interactive helpers.
pub mod term {
    use std::io::{BufRead, IsTerminal, Write};

    pub fn stdin_is_terminal() -> bool {
        std::io::stdin().is_terminal()
    }

    /// Ask a yes/no question on stderr; anything but `y`/`yes` is a no.
    pub fn confirm(question: &str) -> std::io::Result<bool> {
        let mut err = std::io::stderr().lock();
        write!(err, "{question} [y/N] ")?;
        err.flush()?;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}
