//! Interactive loop. Owns the only `SessionState` in the process.

use cmdpilot_core::{Agent, DispatchOutcome};
use cmdpilot_memory::{SessionState, Turn};
use cmdpilot_providers::Backend;
use std::io::{self, BufRead, Write};

const PROMPT: &str = "cmdpilot> ";
const HISTORY_PREVIEW_CHARS: usize = 80;

pub struct Repl<'a, B: Backend> {
    agent: &'a Agent<B>,
    session: SessionState,
}

impl<'a, B: Backend> Repl<'a, B> {
    pub fn new(agent: &'a Agent<B>, history_capacity: usize) -> Self {
        Self {
            agent,
            session: SessionState::new(history_capacity),
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Reads instructions until `exit`, `quit` or end of input.
    pub async fn run<R: BufRead, W: Write>(&mut self, mut input: R, out: &mut W) -> io::Result<()> {
        writeln!(out, "cmdpilot ready (backend: {})", self.agent.backend().name())?;
        writeln!(out, "Type 'help' for commands, 'exit' to quit.\n")?;

        let mut line = String::new();
        loop {
            write!(out, "{}", PROMPT)?;
            out.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                break;
            }
            let instruction = line.trim();
            if instruction.is_empty() {
                continue;
            }

            match instruction.to_ascii_lowercase().as_str() {
                "exit" | "quit" => {
                    writeln!(out, "Goodbye!")?;
                    break;
                }
                "help" => {
                    print_help(out)?;
                    continue;
                }
                "history" => {
                    self.print_history(out)?;
                    continue;
                }
                "clear" => {
                    self.session.clear();
                    writeln!(out, "History cleared.\n")?;
                    continue;
                }
                _ => {}
            }

            let outcome = self.agent.dispatch(instruction, Some(&self.session)).await;
            self.session.record(Turn::new(
                instruction,
                outcome.text.clone(),
                outcome.succeeded(),
            ));
            writeln!(out, "\n{}\n", render_outcome(&outcome))?;
        }

        Ok(())
    }

    fn print_history<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if self.session.is_empty() {
            return writeln!(out, "No history yet.\n");
        }
        for (i, turn) in self.session.turns().enumerate() {
            let marker = if turn.succeeded { "ok" } else { "failed" };
            writeln!(
                out,
                "{:>3}. [{}] {} -> {}",
                i + 1,
                marker,
                turn.instruction,
                preview(&turn.response)
            )?;
        }
        writeln!(out)
    }
}

fn print_help<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "\nCommands:")?;
    writeln!(out, "  exit, quit  - Leave the session")?;
    writeln!(out, "  help        - Show this message")?;
    writeln!(out, "  history     - Show previous instructions")?;
    writeln!(out, "  clear       - Forget the conversation so far")?;
    writeln!(out, "\nAnything else is dispatched. Prefix with 'run' or '$' for a shell command.\n")
}

/// Text of the outcome, prefixed with the error kind on failure.
pub fn render_outcome(outcome: &DispatchOutcome) -> String {
    match outcome.error_kind() {
        None => outcome.text.clone(),
        Some(kind) => format!("Error [{}]: {}", kind, outcome.text),
    }
}

fn preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    let mut shown: String = first_line.chars().take(HISTORY_PREVIEW_CHARS).collect();
    if shown.len() < text.len() {
        shown.push_str("...");
    }
    shown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_cuts_long_and_multiline_text() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview("first\nsecond"), "first...");
        let long = "x".repeat(200);
        assert_eq!(preview(&long).len(), HISTORY_PREVIEW_CHARS + 3);
    }
}
