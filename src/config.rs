use anyhow::{Context, Result};
use regex::Regex;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub log_level: String,
    pub data_dir: PathBuf,
    pub command_dir: Option<PathBuf>,
    pub command_timeout_ms: u64,
    pub blocked_commands: Vec<Regex>,
}

fn expand_tilde(path_str: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path_str).into_owned())
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:3001".to_string());

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let data_dir_str = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let data_dir = expand_tilde(&data_dir_str);

        let command_dir = match std::env::var("COMMAND_DIR").ok().filter(|s| !s.is_empty()) {
            Some(dir) => {
                let dir = expand_tilde(&dir)
                    .canonicalize()
                    .context(format!("Failed to canonicalize COMMAND_DIR: {}", dir))?;
                if !dir.is_dir() {
                    anyhow::bail!("COMMAND_DIR is not a valid directory: {:?}", dir);
                }
                Some(dir)
            }
            None => {
                warn!("COMMAND_DIR is not set. The run-command endpoint will reject all requests.");
                None
            }
        };

        let command_timeout_ms = std::env::var("COMMAND_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse::<u64>()
            .context("Invalid COMMAND_TIMEOUT_MS")?;

        let blocked_commands_str = std::env::var("BLOCKED_COMMANDS").unwrap_or_else(|_| {
            "sudo,su,rm,mkfs,fdisk,dd,reboot,shutdown,poweroff,halt".to_string()
        });
        let blocked_commands = blocked_commands_str
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            // Match command if it's the first word, possibly preceded by env vars
            .map(|s| {
                Regex::new(&format!(
                    r"^(?:[a-zA-Z_][a-zA-Z0-9_]*=[^ ]* )*{}(?:\s.*|$)",
                    regex::escape(s)
                ))
                .context(format!("Invalid regex for blocked command: {}", s))
            })
            .collect::<Result<Vec<Regex>>>()?;

        Ok(Config {
            bind_address,
            log_level,
            data_dir,
            command_dir,
            command_timeout_ms,
            blocked_commands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_command_regex_matches_first_word_only() {
        let re = Regex::new(&format!(
            r"^(?:[a-zA-Z_][a-zA-Z0-9_]*=[^ ]* )*{}(?:\s.*|$)",
            regex::escape("rm")
        ))
        .unwrap();
        assert!(re.is_match("rm -rf /tmp/x"));
        assert!(re.is_match("FOO=bar rm file"));
        assert!(!re.is_match("format"));
        assert!(!re.is_match("echo rm"));
    }
}
