use crate::command::{Command, Redirect};
use crate::env::{Environment, is_valid_name};
use crate::error::ParsingError;
use crate::wildcard::expand_globs;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Matches `2>file`, `2>>file`, `&>file`, `&>>file` and the same without a filename.
static REDIR_COMBINED_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<fd>[0-9]+|&)(?P<op>>>|>)(?P<rest>.*)$").expect("valid redirection regex")
});

/// Descriptor named on the left of an output redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Stdout,
    Stderr,
    Both,
}

impl Target {
    fn from_fd(fd: &str, op: &str) -> Result<Self, ParsingError> {
        match fd {
            "1" => Ok(Target::Stdout),
            "2" => Ok(Target::Stderr),
            "&" => Ok(Target::Both),
            _ => Err(ParsingError::UnsupportedFd(format!("{fd}{op}"))),
        }
    }
}

/// Returns true if `tok` looks like `NAME=value` with a valid `NAME`.
pub fn is_assignment_token(tok: &str) -> bool {
    match tok.split_once('=') {
        Some((name, _)) => is_valid_name(name),
        None => false,
    }
}

/// Split a token stream on top-level `;` tokens, dropping empty segments.
pub fn split_on_semicolons(tokens: &[String]) -> Vec<&[String]> {
    tokens
        .split(|t| t == ";")
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Walks the expanded tokens of one simple command, separating redirections from arguments.
struct CommandBuilder {
    tokens: Vec<String>,
    pos: usize,
    cmd: Command,
    argv: Vec<String>,
}

impl CommandBuilder {
    fn from(tokens: Vec<String>) -> Self {
        CommandBuilder {
            tokens,
            pos: 0,
            cmd: Command::default(),
            argv: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn consume(&mut self) -> Option<String> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the filename following a redirection operator.
    fn expect_target(&mut self, operator: &str) -> Result<String, ParsingError> {
        match self.consume() {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(ParsingError::MissingRedirectTarget(operator.to_string())),
        }
    }

    fn apply(&mut self, target: Target, path: String, append: bool) {
        let redirect = Redirect::new(path, append);
        match target {
            Target::Stdout => self.cmd.redirect_stdout(redirect),
            Target::Stderr => self.cmd.redirect_stderr(redirect),
            Target::Both => self.cmd.redirect_both(redirect),
        }
    }

    fn build(mut self) -> Result<Option<Command>, ParsingError> {
        while let Some(tok) = self.consume() {
            match tok.as_str() {
                "<" => {
                    let path = self.expect_target(&tok)?;
                    self.cmd.stdin = Some(path);
                }
                ">" | ">>" => {
                    let path = self.expect_target(&tok)?;
                    self.apply(Target::Stdout, path, tok == ">>");
                }
                fd if is_fd_number(fd) && matches!(self.peek(), Some(">") | Some(">>")) => {
                    let op = self.consume().unwrap_or_default();
                    let operator = format!("{fd}{op}");
                    let target = Target::from_fd(fd, &op)?;
                    let path = self.expect_target(&operator)?;
                    self.apply(target, path, op == ">>");
                }
                _ => {
                    if let Some((target, op, rest)) = split_combined(&tok) {
                        let target = target?;
                        let path = if rest.is_empty() {
                            let fd = tok.strip_suffix(op.as_str()).unwrap_or(&tok);
                            self.expect_target(&format!("{fd}{op}"))?
                        } else {
                            rest
                        };
                        self.apply(target, path, op == ">>");
                    } else {
                        self.argv.push(tok);
                    }
                }
            }
        }

        let mut argv = self.argv.into_iter();
        let Some(name) = argv.next() else {
            return Ok(None);
        };
        self.cmd.name = name;
        self.cmd.args = argv.collect();
        Ok(Some(self.cmd))
    }
}

fn is_fd_number(tok: &str) -> bool {
    !tok.is_empty() && tok.chars().all(|c| c.is_ascii_digit())
}

/// Split a fused redirection token into its target, operator and trailing filename.
fn split_combined(tok: &str) -> Option<(Result<Target, ParsingError>, String, String)> {
    let caps = REDIR_COMBINED_RX.captures(tok)?;
    let fd = &caps["fd"];
    let op = caps["op"].to_string();
    let rest = caps["rest"].to_string();
    Some((Target::from_fd(fd, &op), op, rest))
}

/// Parse one simple command.
///
/// Leading `NAME=value` tokens are stored as non-exported variables. The remaining
/// tokens are interpolated, glob-expanded and scanned for redirections.
///
/// # Returns
///
/// `Ok(None)` when nothing is left to execute, e.g. for an assignment-only line.
pub fn parse_simple_command(
    tokens: &[String],
    env: &mut Environment,
) -> Result<Option<Command>, ParsingError> {
    let mut idx = 0;
    while let Some(tok) = tokens.get(idx) {
        let Some((name, value)) = tok.split_once('=') else {
            break;
        };
        if !is_valid_name(name) {
            break;
        }
        // Stored raw; interpolation happens where the variable is used.
        env.set_var(name, value, false);
        idx += 1;
    }

    if idx >= tokens.len() {
        return Ok(None);
    }

    let interpolated: Vec<String> = tokens[idx..].iter().map(|t| env.interpolate(t)).collect();
    let expanded = expand_globs(interpolated);
    let cmd = CommandBuilder::from(expanded).build()?;
    debug!(?cmd, "parsed simple command");
    Ok(cmd)
}

/// Parse every `;`-separated segment, dropping segments that yield no command.
pub fn parse_command_list(
    tokens: &[String],
    env: &mut Environment,
) -> Result<Vec<Command>, ParsingError> {
    let mut commands = Vec::new();
    for segment in split_on_semicolons(tokens) {
        if let Some(cmd) = parse_simple_command(segment, env)? {
            commands.push(cmd);
        }
    }
    Ok(commands)
}
