//! Error types shared by the lexer, the parsers and the read-eval loop.

use thiserror::Error;

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexingError {
    /// A closing quote (single or double) was not found.
    #[error("unterminated {0} quote")]
    UnfinishedQuote(char),
    /// The line ended right after an escaping backslash.
    #[error("no character after escaping backslash")]
    DanglingEscape,
}

/// Errors that can occur while turning tokens into commands or if-statements.
///
/// All of these abort the current line or block only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsingError {
    #[error(transparent)]
    Lexing(#[from] LexingError),
    /// A redirection operator was the last token, or was followed by an empty word.
    #[error("expected filename after '{0}'")]
    MissingRedirectTarget(String),
    /// Only descriptors 1 and 2 (and `&` for both) may be redirected to files.
    #[error("unsupported fd redirection: {0}")]
    UnsupportedFd(String),
    #[error("if block must start with 'if'")]
    MissingIf,
    /// A control-flow keyword showed up where the grammar does not allow it.
    #[error("unexpected '{keyword}' {state}")]
    UnexpectedKeyword {
        keyword: String,
        state: &'static str,
    },
    #[error("missing 'then'")]
    MissingThen,
    #[error("missing 'fi'")]
    MissingFi,
    #[error("unexpected tokens after fi: {0:?}")]
    TrailingTokens(Vec<String>),
}

/// Errors surfaced to the read-eval loop.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("syntax error: {0}")]
    Syntax(#[from] ParsingError),
    #[error("failed to read input: {0}")]
    Input(#[from] std::io::Error),
}

/// A redirection target that could not be opened before dispatch.
#[derive(Debug, Error)]
#[error("{path}: {source}")]
pub struct RedirectError {
    pub path: String,
    pub source: std::io::Error,
}

impl RedirectError {
    pub fn new(path: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}
