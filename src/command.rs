use crate::env::Environment;
use anyhow::Result;
use std::io::{Read, Write};
use std::process::Stdio;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Status reported when a name resolves to neither a builtin nor an executable.
pub const NOT_FOUND: ExitCode = 127;

/// Abstraction over a readable input stream that can also be converted into
/// a [`Stdio`] handle for spawning external processes.
///
/// A blanket implementation exists for any type that implements `Read` and
/// `Into<Stdio>` (e.g. `File`).
pub trait Stdin: Read {
    /// Convert this input into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> Stdio;
}

impl<T: Read + Into<Stdio>> Stdin for T {
    fn stdio(self: Box<Self>) -> Stdio {
        (*self).into()
    }
}

/// Abstraction over a writable output stream that can also be converted into
/// a [`Stdio`] handle for spawning external processes.
///
/// A blanket implementation exists for any type that implements `Write` and
/// `Into<Stdio>` (e.g. `File`, `std::io::Stdout` or `std::io::Stderr`).
pub trait Stdout: Write {
    /// Convert this output into a [`Stdio`] handle suitable for `std::process::Command`.
    fn stdio(self: Box<Self>) -> Stdio;
}

impl<T: Write + Into<Stdio>> Stdout for T {
    fn stdio(self: Box<Self>) -> Stdio {
        (*self).into()
    }
}

/// The three standard streams handed to a command.
pub struct Streams {
    pub stdin: Box<dyn Stdin>,
    pub stdout: Box<dyn Stdout>,
    pub stderr: Box<dyn Stdout>,
}

/// Object-safe trait for any command that can be executed by the shell.
///
/// This is implemented by built-ins via a blanket impl and by external commands.
pub trait ExecutableCommand {
    /// Executes the command.
    fn execute(self: Box<Self>, streams: Streams, env: &mut Environment) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
/// Implementations can use the environment to resolve executables (e.g., using PATH).
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(
        &self,
        env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>>;
}

/// A file target for an output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
    /// Open with `>>` semantics instead of truncating.
    pub append: bool,
}

impl Redirect {
    pub fn new(path: impl Into<String>, append: bool) -> Self {
        Self {
            path: path.into(),
            append,
        }
    }
}

/// A fully expanded simple command, ready to be dispatched.
///
/// When `combined` is set, `stdout` and `stderr` hold the same [`Redirect`] and
/// the executor must open the target only once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub stdout: Option<Redirect>,
    pub stderr: Option<Redirect>,
    pub combined: bool,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            ..Self::default()
        }
    }

    /// Route stdout to `target`, breaking up an earlier combined redirection.
    pub fn redirect_stdout(&mut self, target: Redirect) {
        if self.combined {
            self.combined = false;
            self.stderr = self.stdout.take();
        }
        self.stdout = Some(target);
    }

    /// Route stderr to `target`, breaking up an earlier combined redirection.
    pub fn redirect_stderr(&mut self, target: Redirect) {
        if self.combined {
            self.combined = false;
        }
        self.stderr = Some(target);
    }

    /// Route both output streams to one shared target.
    pub fn redirect_both(&mut self, target: Redirect) {
        self.stdout = Some(target.clone());
        self.stderr = Some(target);
        self.combined = true;
    }
}

/// Executes parsed commands on behalf of the control-flow nodes.
///
/// The interpreter provides the real implementation; tests substitute recorders.
pub trait CommandExecutor {
    fn execute(&mut self, cmd: &Command, env: &mut Environment) -> ExitCode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_redirect_shares_target() {
        let mut cmd = Command::new("cmd", vec![]);
        cmd.redirect_both(Redirect::new("both.txt", true));
        assert!(cmd.combined);
        assert_eq!(cmd.stdout, cmd.stderr);
        assert_eq!(cmd.stdout, Some(Redirect::new("both.txt", true)));
    }

    #[test]
    fn test_later_stdout_redirect_splits_combined() {
        let mut cmd = Command::new("cmd", vec![]);
        cmd.redirect_both(Redirect::new("both.txt", false));
        cmd.redirect_stdout(Redirect::new("out.txt", false));
        assert!(!cmd.combined);
        assert_eq!(cmd.stdout, Some(Redirect::new("out.txt", false)));
        assert_eq!(cmd.stderr, Some(Redirect::new("both.txt", false)));
    }
}
