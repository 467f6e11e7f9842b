use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Empty command")]
    Empty,
    #[error("Command not allowed: {0}")]
    NotAllowed(String),
    #[error("Argument {argument} not allowed for {program}")]
    ArgumentNotAllowed { program: String, argument: String },
    #[error("Command uses a construct the policy cannot inspect: {0}")]
    Opaque(String),
    #[error("Model-proposed commands are disabled")]
    Disabled,
}

/// Gate for commands proposed by the model. Commands typed by the user bypass it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CommandPolicy {
    Unrestricted,
    AllowList {
        #[serde(default = "CommandPolicy::default_allow_list")]
        commands: Vec<String>,
    },
    DenyAll,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        CommandPolicy::AllowList {
            commands: Self::default_allow_list(),
        }
    }
}

impl CommandPolicy {
    /// Read-only inspection commands.
    pub fn default_allow_list() -> Vec<String> {
        [
            "ls", "cat", "echo", "pwd", "date", "whoami", "uname", "df", "du", "uptime",
            "hostname", "head", "tail", "wc", "find", "grep", "ps",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn check(&self, command: &str) -> Result<(), PolicyError> {
        if command.trim().is_empty() {
            return Err(PolicyError::Empty);
        }

        let allowed = match self {
            CommandPolicy::Unrestricted => return Ok(()),
            CommandPolicy::DenyAll => return Err(PolicyError::Disabled),
            CommandPolicy::AllowList { commands } => commands,
        };

        for marker in ["`", "$(", ">"] {
            if command.contains(marker) {
                return Err(PolicyError::Opaque(marker.to_string()));
            }
        }

        for words in stages(command) {
            let program = words[0];
            let base = program.rsplit('/').next().unwrap_or(program);
            if !allowed.iter().any(|a| a == base) {
                return Err(PolicyError::NotAllowed(base.to_string()));
            }
            if let Some(argument) = writing_argument(base, &words[1..]) {
                return Err(PolicyError::ArgumentNotAllowed {
                    program: base.to_string(),
                    argument: argument.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Arguments that turn an otherwise read-only program into one that writes,
/// deletes or runs other programs. A trailing `*` matches by prefix.
const WRITING_ARGUMENTS: &[(&str, &[&str])] = &[
    (
        "find",
        &["-delete", "-exec", "-execdir", "-ok", "-okdir", "-fprint*", "-fls"],
    ),
];

fn writing_argument<'a>(program: &str, args: &[&'a str]) -> Option<&'a str> {
    let denied = WRITING_ARGUMENTS
        .iter()
        .find(|(name, _)| *name == program)
        .map(|(_, denied)| *denied)?;
    args.iter().copied().find(|arg| {
        denied.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => arg.starts_with(prefix),
            None => arg == pattern,
        })
    })
}

/// Words of every pipeline stage or list element, from the program on.
/// Leading `VAR=value` assignments are skipped.
fn stages(command: &str) -> Vec<Vec<&str>> {
    command
        .split(|c| matches!(c, '|' | ';' | '&' | '\n'))
        .map(|segment| {
            segment
                .split_whitespace()
                .skip_while(|word| is_assignment(word))
                .collect::<Vec<_>>()
        })
        .filter(|words| !words.is_empty())
        .collect()
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_read_only() {
        let policy = CommandPolicy::default();
        assert!(policy.check("ls -la").is_ok());
        assert!(policy.check("ps aux | grep sshd | wc -l").is_ok());
        assert!(policy.check("df -h && uptime").is_ok());
        assert!(policy.check("LC_ALL=C /bin/date").is_ok());
    }

    #[test]
    fn test_default_rejects_unlisted_stage() {
        let policy = CommandPolicy::default();
        assert_eq!(
            policy.check("ls; rm -rf /tmp/x"),
            Err(PolicyError::NotAllowed("rm".to_string()))
        );
        assert_eq!(
            policy.check("cat notes.txt | sudo tee /etc/motd"),
            Err(PolicyError::NotAllowed("sudo".to_string()))
        );
        assert!(policy.check("ls || curl http://example.com").is_err());
        assert_eq!(
            policy.check("find . -delete"),
            Err(PolicyError::ArgumentNotAllowed {
                program: "find".to_string(),
                argument: "-delete".to_string(),
            })
        );
        assert!(policy.check("find . -name '*' -exec rm -rf {} +").is_err());
        assert!(policy.check("ls | find /tmp -execdir sh -c id ;").is_err());
        assert!(policy.check("find . -fprintf out.txt %p").is_err());
        assert!(policy.check("find . -name '*.rs' -newer Cargo.toml").is_ok());
    }

    #[test]
    fn test_default_rejects_substitution_and_redirect() {
        let policy = CommandPolicy::default();
        assert!(matches!(policy.check("echo $(rm x)"), Err(PolicyError::Opaque(_))));
        assert!(matches!(policy.check("echo `id`"), Err(PolicyError::Opaque(_))));
        assert!(matches!(policy.check("echo hi > out.txt"), Err(PolicyError::Opaque(_))));
    }

    #[test]
    fn test_unrestricted_and_deny_all() {
        assert!(CommandPolicy::Unrestricted.check("rm -rf build").is_ok());
        assert_eq!(CommandPolicy::DenyAll.check("ls"), Err(PolicyError::Disabled));
        assert_eq!(CommandPolicy::Unrestricted.check("  "), Err(PolicyError::Empty));
    }
}
