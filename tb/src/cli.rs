//! CLI command definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::system::DEFAULT_USER;

/// TutorBus - language-routed teaching assistants over a message bus
#[derive(Parser)]
#[command(
    name = "tb",
    about = "Route questions to Chinese and English teaching assistants and track their cost",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute (defaults to chat)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive question/answer console
    Chat {
        /// User id attached to every question
        #[arg(short, long, default_value = DEFAULT_USER)]
        user: String,
    },

    /// Ask a single question and print the answer
    Ask {
        /// Question text
        question: String,

        /// User id attached to the question
        #[arg(short, long, default_value = DEFAULT_USER)]
        user: String,

        /// Seconds to wait for the answer (default from config)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show which language and channel a text routes to
    Route {
        /// Text to classify
        text: String,
    },

    /// Print the resolved configuration
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::parse_from(["tb", "--log-level", "DEBUG", "ask", "What is a gerund?", "-t", "5"]);
        assert_eq!(cli.log_level.as_deref(), Some("DEBUG"));
        match cli.command {
            Some(Command::Ask { question, user, timeout }) => {
                assert_eq!(question, "What is a gerund?");
                assert_eq!(user, DEFAULT_USER);
                assert_eq!(timeout, Some(5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_no_subcommand() {
        let cli = Cli::parse_from(["tb"]);
        assert!(cli.command.is_none());
    }
}
