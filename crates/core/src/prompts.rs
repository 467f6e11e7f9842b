//! Prompt templates sent to the backend.

use cmdpilot_executor::ShellResult;

pub fn classification(instruction: &str, context: Option<&str>) -> String {
    format!(
        r#"{context}You are helping process user commands in a command-line interface.

User command: "{instruction}"

Based on this command, do one of these:
1. If it needs a system command (checking the time, listing processes, disk usage, etc.), reply with:
   ACTION: shell
   COMMAND: <the exact shell command to run>

2. If it asks to read, write or list files, reply with:
   ACTION: file
   OP: <read|write|list>
   PATH: <the file or directory path>
   CONTENT: <the text to write, only for write>

3. If it's a question or conversation, reply with:
   ACTION: respond
   CONTENT: <your helpful response>

4. If there's an error or you can't process it, reply with:
   ACTION: error
   REASON: <explanation of the error>

Reply using ONLY this format, with no additional text.
"#,
        context = context_block(context),
        instruction = instruction.trim(),
    )
}

pub fn question(instruction: &str, context: Option<&str>) -> String {
    format!(
        "{}You are a helpful command-line assistant. Answer concisely.\n\nUser: {}\nAssistant:",
        context_block(context),
        instruction.trim()
    )
}

pub fn summary(instruction: &str, result: &ShellResult) -> String {
    let exit = match result.exit_code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    };
    format!(
        r#"The user asked: "{instruction}"
To answer it, this shell command was run: {command}

Exit code: {exit}
Timed out: {timed_out}
Stdout:
{stdout}
Stderr:
{stderr}

Explain the result to the user in plain language. If the command failed or timed out, say why."#,
        instruction = instruction.trim(),
        command = result.command,
        exit = exit,
        timed_out = if result.timed_out { "yes" } else { "no" },
        stdout = or_empty(&result.stdout),
        stderr = or_empty(&result.stderr),
    )
}

/// Summary prompt for a command the shell never started.
pub fn spawn_failure(instruction: &str, command: &str, error: &str) -> String {
    format!(
        r#"The user asked: "{instruction}"
To answer it, this shell command was proposed: {command}

The command could not be started: {error}

Explain to the user in plain language that the command did not run and what may have gone wrong."#,
        instruction = instruction.trim(),
        command = command,
        error = error,
    )
}

fn context_block(context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.trim().is_empty() => format!("{}\n", ctx.trim_end()),
        _ => String::new(),
    }
}

fn or_empty(text: &str) -> &str {
    if text.trim().is_empty() {
        "(empty)"
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classification_prompt_lists_actions() {
        let prompt = classification("how much disk is free", None);
        assert!(prompt.starts_with("You are helping"));
        assert!(prompt.contains("User command: \"how much disk is free\""));
        for action in ["ACTION: shell", "ACTION: file", "ACTION: respond", "ACTION: error"] {
            assert!(prompt.contains(action));
        }
    }

    #[test]
    fn test_context_is_prepended() {
        let prompt = question("and tomorrow?", Some("Previous conversation:\nUser: hi\n"));
        assert!(prompt.starts_with("Previous conversation:\nUser: hi\n\n"));
        assert!(prompt.ends_with("User: and tomorrow?\nAssistant:"));
    }

    #[test]
    fn test_summary_prompt_reports_failure() {
        let result = ShellResult {
            command: "sleep 99".to_string(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::from_secs(30),
            timed_out: true,
        };
        let prompt = summary("wait a while", &result);
        assert!(prompt.contains("Exit code: none (terminated by signal)"));
        assert!(prompt.contains("Timed out: yes"));
        assert!(prompt.contains("Stdout:\n(empty)"));
    }

    #[test]
    fn test_spawn_failure_prompt_names_error() {
        let prompt = spawn_failure("what time is it", "date", "No such file or directory");
        assert!(prompt.contains("proposed: date"));
        assert!(prompt.contains("could not be started: No such file or directory"));
    }
}
