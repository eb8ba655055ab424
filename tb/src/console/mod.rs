//! Interactive chat console

use std::sync::Arc;

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

mod render;

pub use render::{
    answer_title, render_cost_table, render_error, render_outcome, render_reply, render_route, render_status,
};

use crate::system::TeachingSystem;

/// Inputs that end the session
const EXIT_WORDS: [&str; 4] = ["quit", "exit", "退出", "q"];

/// Result of handling a slash command
enum SlashResult {
    Continue,
    Quit,
}

pub fn is_exit_word(input: &str) -> bool {
    let lowered = input.trim().to_lowercase();
    EXIT_WORDS.contains(&lowered.as_str())
}

/// Line-oriented question/answer session over a running system
pub struct ChatConsole {
    system: Arc<TeachingSystem>,
    user_id: String,
}

impl ChatConsole {
    pub fn new(system: Arc<TeachingSystem>, user_id: impl Into<String>) -> Self {
        Self {
            system,
            user_id: user_id.into(),
        }
    }

    /// Run until the user exits; does not shut the system down
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();
        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            let readline = rl.readline(&format!("{} ", "Question>".bright_cyan().bold()));

            match readline {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        println!("{}", "Please enter a valid question".yellow());
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    if is_exit_word(input) {
                        break;
                    }

                    if input.starts_with('/') {
                        match self.handle_slash_command(input).await {
                            SlashResult::Continue => continue,
                            SlashResult::Quit => break,
                        }
                    }

                    println!("{}", "Processing...".dimmed());
                    let outcome = self.system.ask(input, &self.user_id, None).await;
                    println!("{}", render_outcome(&outcome));
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre::eyre!("Readline error: {}", err));
                }
            }
        }

        Ok(())
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", "TutorBus Teaching System".bright_cyan().bold());
        println!("Ask in Chinese or English; questions are routed automatically");
        println!(
            "Type {} for commands, {} or {} to exit",
            "/help".yellow(),
            "quit".yellow(),
            "exit".yellow()
        );
        println!();
    }

    async fn handle_slash_command(&self, input: &str) -> SlashResult {
        debug!(%input, "ChatConsole::handle_slash_command: called");
        let cmd = input.split_whitespace().next().unwrap_or("");

        match cmd {
            "/help" | "/h" => {
                println!();
                println!("{}", "Available Commands:".bright_cyan());
                println!("  {:10} Show this help", "/help".yellow());
                println!("  {:10} Show cost statistics", "/stats".yellow());
                println!("  {:10} Show system status", "/status".yellow());
                println!("  {:10} Reset cost statistics", "/reset".yellow());
                println!("  {:10} Exit", "/quit".yellow());
                println!();
                SlashResult::Continue
            }
            "/stats" => {
                println!("{}", self.system.cost_stats().render_summary());
                SlashResult::Continue
            }
            "/status" => {
                println!("{}", render_status(&self.system.status().await));
                SlashResult::Continue
            }
            "/reset" => {
                self.system.reset_costs();
                println!("{}", "Cost statistics reset.".dimmed());
                SlashResult::Continue
            }
            "/quit" | "/q" | "/exit" => SlashResult::Quit,
            _ => {
                println!("{} Unknown command: {}", "?".yellow(), cmd);
                println!("Type {} for available commands", "/help".yellow());
                SlashResult::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_words() {
        assert!(is_exit_word("quit"));
        assert!(is_exit_word("EXIT"));
        assert!(is_exit_word(" 退出 "));
        assert!(is_exit_word("Q"));
        assert!(!is_exit_word("quite"));
        assert!(!is_exit_word("你好"));
    }
}
