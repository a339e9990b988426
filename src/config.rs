use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PROMPT: &str = "smash";
const DEFAULT_INTERPRETER: &str = "/bin/sh";
const DEFAULT_POLL_MS: u64 = 10;

/// Startup settings, read once from the environment.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Prompt text shown before `> `; also what `chprompt` resets to.
    pub prompt: String,
    /// Program that runs external command text as `<interpreter> -c <text>`.
    pub interpreter: PathBuf,
    /// How often the foreground wait checks on its job and the signal relay.
    pub poll_interval: Duration,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
        }
    }
}

impl ShellConfig {
    /// Build the configuration from `SMASH_PROMPT`, `SMASH_SH` and `SMASH_POLL_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(prompt) = lookup("SMASH_PROMPT").filter(|p| !p.is_empty()) {
            config.prompt = prompt;
        }
        if let Some(interpreter) = lookup("SMASH_SH").filter(|p| !p.is_empty()) {
            config.interpreter = PathBuf::from(interpreter);
        }
        if let Some(raw) = lookup("SMASH_POLL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.poll_interval = Duration::from_millis(ms.max(1)),
                Err(_) => tracing::warn!("ignoring malformed SMASH_POLL_MS={raw:?}"),
            }
        }

        config
    }
}
