use std::path::PathBuf;

use crate::parser;

/// Commands that run inside the shell process itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Pwd,
    ShowPid,
    ChPrompt,
    Cd,
    Kill,
    Jobs,
    Fg,
    Bg,
    Quit,
    Tail,
    Touch,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        let builtin = match name {
            "pwd" => Self::Pwd,
            "showpid" => Self::ShowPid,
            "chprompt" => Self::ChPrompt,
            "cd" => Self::Cd,
            "kill" => Self::Kill,
            "jobs" => Self::Jobs,
            "fg" => Self::Fg,
            "bg" => Self::Bg,
            "quit" => Self::Quit,
            "tail" => Self::Tail,
            "touch" => Self::Touch,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pwd => "pwd",
            Self::ShowPid => "showpid",
            Self::ChPrompt => "chprompt",
            Self::Cd => "cd",
            Self::Kill => "kill",
            Self::Jobs => "jobs",
            Self::Fg => "fg",
            Self::Bg => "bg",
            Self::Quit => "quit",
            Self::Tail => "tail",
            Self::Touch => "touch",
        }
    }
}

/// Which output stream of the left side feeds the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeSource {
    /// `|`
    Stdout,
    /// `|&`
    Stderr,
}

/// How the redirection target is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// `>`
    Truncate,
    /// `>>`
    Append,
}

/// The closed set of things a command line can be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Builtin(Builtin),
    External,
    Pipeline {
        left: String,
        right: String,
        source: PipeSource,
    },
    Redirect {
        inner: String,
        target: PathBuf,
        mode: RedirectMode,
    },
}

/// One parsed command line. Owned by whoever is running it; moves into the
/// job table if the command becomes a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// The line as typed (trimmed), background marker included.
    text: String,
    /// `text` with the background marker removed; what actually runs.
    body: String,
    argv: Vec<String>,
    background: bool,
    kind: CommandKind,
}

impl CommandLine {
    /// Parse one input line. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let text = parser::trim(line);
        if text.is_empty() {
            return None;
        }

        let background = parser::is_background(text);
        let body = parser::strip_background(text).to_string();
        let argv = parser::tokenize(&body);
        let kind = classify(&body, &argv);

        Some(Self {
            text: text.to_string(),
            body,
            argv,
            background,
            kind,
        })
    }

    /// Text shown by `jobs`, `fg`, `bg` and `quit kill`.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    #[cfg(test)]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Arguments after the command name.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }
}

/// Pipelines win over redirections, which win over builtin lookup.
fn classify(body: &str, argv: &[String]) -> CommandKind {
    if let Some(index) = body.find('|') {
        let (source, width) = if body[index + 1..].starts_with('&') {
            (PipeSource::Stderr, 2)
        } else {
            (PipeSource::Stdout, 1)
        };
        return CommandKind::Pipeline {
            left: parser::trim(&body[..index]).to_string(),
            right: parser::trim(&body[index + width..]).to_string(),
            source,
        };
    }

    if let Some(index) = body.find('>') {
        let (mode, width) = if body[index + 1..].starts_with('>') {
            (RedirectMode::Append, 2)
        } else {
            (RedirectMode::Truncate, 1)
        };
        return CommandKind::Redirect {
            inner: parser::trim(&body[..index]).to_string(),
            target: PathBuf::from(parser::trim(&body[index + width..])),
            mode,
        };
    }

    match argv.first().and_then(|name| Builtin::from_name(name)) {
        Some(builtin) => CommandKind::Builtin(builtin),
        None => CommandKind::External,
    }
}
