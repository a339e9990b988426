/// Characters treated as blanks when trimming a command line.
const WHITESPACE: &[char] = &[' ', '\n', '\r', '\t', '\x0c', '\x0b'];

/// States for the tokenizer state machine.
enum State {
    /// Between tokens; whitespace is skipped
    Normal,
    /// Building an unquoted word; whitespace ends it
    InWord,
    /// Inside double quotes; whitespace is preserved
    InDoubleQuote,
    /// Inside single quotes; everything is literal
    InSingleQuote,
}

/// Trim the shell's whitespace set from both ends of `line`.
pub fn trim(line: &str) -> &str {
    line.trim_matches(WHITESPACE)
}

/// True when the last non-blank character of `line` is the background marker `&`.
pub fn is_background(line: &str) -> bool {
    line.trim_end_matches(WHITESPACE).ends_with('&')
}

/// Remove a trailing background marker and the blanks around it.
/// Lines without a marker come back trimmed on the right only.
pub fn strip_background(line: &str) -> &str {
    let line = line.trim_end_matches(WHITESPACE);
    match line.strip_suffix('&') {
        Some(rest) => rest.trim_end_matches(WHITESPACE),
        None => line,
    }
}

/// Split a (background-stripped) line into its argument vector.
///
/// Quotes group words and are removed; a backslash makes the next
/// character literal. No expansion happens here: external command text
/// is handed to the interpreter untouched, so only builtins see this
/// vector.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match (&state, ch) {
            // ── Normal state: between tokens ──
            (State::Normal, c) if WHITESPACE.contains(&c) => {}
            (State::Normal, '"') => {
                state = State::InDoubleQuote;
            }
            (State::Normal, '\'') => {
                state = State::InSingleQuote;
            }
            (State::Normal, '\\') => {
                current.push(chars.next().unwrap_or('\\'));
                state = State::InWord;
            }
            (State::Normal, c) => {
                current.push(c);
                state = State::InWord;
            }

            // ── InWord state: building an unquoted token ──
            (State::InWord, c) if WHITESPACE.contains(&c) => {
                words.push(std::mem::take(&mut current));
                state = State::Normal;
            }
            (State::InWord, '"') => {
                state = State::InDoubleQuote;
            }
            (State::InWord, '\'') => {
                state = State::InSingleQuote;
            }
            (State::InWord, '\\') => {
                current.push(chars.next().unwrap_or('\\'));
            }
            (State::InWord, c) => {
                current.push(c);
            }

            // ── InDoubleQuote state: inside "..." ──
            (State::InDoubleQuote, '"') => {
                // "" is a valid empty arg, so the word survives even if empty
                state = State::InWord;
            }
            (State::InDoubleQuote, '\\') => match chars.peek() {
                Some(&next) if matches!(next, '"' | '\\' | '$' | '`') => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push('\\'),
            },
            (State::InDoubleQuote, c) => {
                current.push(c);
            }

            // ── InSingleQuote state: inside '...' ──
            (State::InSingleQuote, '\'') => {
                state = State::InWord;
            }
            (State::InSingleQuote, c) => {
                current.push(c);
            }
        }
    }

    // Unclosed quotes keep whatever was collected.
    if !matches!(state, State::Normal) {
        words.push(current);
    }

    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_command() {
        assert_eq!(tokenize("echo hello world"), vec!["echo", "hello", "world"]);
    }

    #[test]
    fn tabs_and_repeated_blanks_separate_words() {
        assert_eq!(tokenize("  kill\t-9   3 "), vec!["kill", "-9", "3"]);
    }

    #[test]
    fn double_quotes_preserve_spaces() {
        assert_eq!(tokenize(r#"chprompt "my   shell""#), vec!["chprompt", "my   shell"]);
    }

    #[test]
    fn single_quotes_no_escaping() {
        assert_eq!(tokenize(r"'hello\nworld'"), vec![r"hello\nworld"]);
    }

    #[test]
    fn backslash_escapes_space() {
        assert_eq!(tokenize(r"cd my\ dir"), vec!["cd", "my dir"]);
    }

    #[test]
    fn quotes_mid_word() {
        assert_eq!(tokenize(r#"he"llo wor"ld"#), vec!["hello world"]);
    }

    #[test]
    fn backslash_in_double_quotes() {
        assert_eq!(tokenize(r#""hello\\world""#), vec![r"hello\world"]);
        assert_eq!(tokenize(r#""hello\"world""#), vec![r#"hello"world"#]);
        assert_eq!(tokenize(r#""a\b""#), vec![r"a\b"]);
    }

    #[test]
    fn empty_quoted_args_are_kept() {
        assert_eq!(tokenize(r#"cmd "" ''"#), vec!["cmd", "", ""]);
    }

    #[test]
    fn trailing_backslash_is_literal() {
        assert_eq!(tokenize(r"foo\"), vec![r"foo\"]);
        assert_eq!(tokenize(r"\"), vec![r"\"]);
    }

    #[test]
    fn unterminated_quote_keeps_content() {
        assert_eq!(tokenize("echo 'abc"), vec!["echo", "abc"]);
    }

    #[test]
    fn empty_input_has_no_words() {
        assert!(tokenize("").is_empty());
        assert!(tokenize(" \t ").is_empty());
    }

    #[test]
    fn background_marker_detection() {
        assert!(is_background("sleep 5 &"));
        assert!(is_background("sleep 5&   \t"));
        assert!(!is_background("sleep 5"));
        assert!(!is_background("a & b"));
        assert!(!is_background(""));
    }

    #[test]
    fn background_marker_stripping() {
        assert_eq!(strip_background("sleep 5 &  "), "sleep 5");
        assert_eq!(strip_background("sleep 5&"), "sleep 5");
        assert_eq!(strip_background("sleep 5  "), "sleep 5");
        assert_eq!(strip_background("&"), "");
    }

    #[test]
    fn trim_uses_shell_whitespace() {
        assert_eq!(trim("\x0b ls -l \r\n"), "ls -l");
    }
}
