use crate::command::{CommandFactory, ExecutableCommand, ExitCode, Streams};
use crate::env::{Environment, is_valid_name};
use crate::interpreter::Factory;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

/// Built-in commands known to the shell at compile time.
///
/// Builtins are executed directly in-process without spawning a child process.
/// Some of them parse their arguments with [`argh`]; the ones whose operands may
/// start with a dash (`echo`, `exit`, `cat`, `test`, `ls`, `rm`) take the raw
/// argument list.
pub(crate) trait BuiltinCommand: Sized {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Additional names the command answers to, e.g. "[" for "test".
    fn aliases() -> &'static [&'static str] {
        &[]
    }

    /// Build the command from the name it was invoked as and its arguments.
    fn parse(name: &str, args: &[&str]) -> Result<Self, EarlyExit>;

    /// Executes the command using provided IO streams and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, streams: Streams, env: &mut Environment) -> Result<ExitCode> {
        let Streams {
            mut stdin,
            mut stdout,
            mut stderr,
        } = streams;
        let result = BuiltinCommand::execute(*self, &mut stdin, &mut stdout, &mut stderr, env);
        stdout.flush()?;
        match result {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(stderr, "{}: {:#}", T::name(), e)?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, streams: Streams, _env: &mut Environment) -> Result<ExitCode> {
        let Streams {
            mut stdout,
            mut stderr,
            ..
        } = streams;
        if self.is_error {
            writeln!(stderr, "{}", self.output.trim_end())?;
            Ok(2)
        } else {
            writeln!(stdout, "{}", self.output.trim_end())?;
            Ok(0)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(
        &self,
        _env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() || T::aliases().contains(&name) {
            Some(match T::parse(name, args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Resolve a user-supplied path against the session's working directory.
fn resolve(env: &Environment, path: &str) -> PathBuf {
    env.current_dir.join(path)
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn parse(name: &str, args: &[&str]) -> Result<Self, EarlyExit> {
        Self::from_args(&[name], args)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", env.current_dir.to_string_lossy())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    /// Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn parse(name: &str, args: &[&str]) -> Result<Self, EarlyExit> {
        Self::from_args(&[name], args)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => {
                let home = env.get_var("HOME");
                PathBuf::from(if home.is_empty() { "/" } else { home.as_str() })
            }
        };

        let new_dir = env.current_dir.join(target);

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("no such file or directory: {}", new_dir.display()))?;
        if !canonical.is_dir() {
            anyhow::bail!("not a directory: {}", canonical.display());
        }

        env::set_current_dir(&canonical)
            .with_context(|| format!("can't chdir to {}", canonical.display()))?;
        env.current_dir = canonical;
        Ok(0)
    }
}

/// Exit the shell with the given status (0 when omitted).
pub struct Exit {
    pub status: Option<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn parse(_name: &str, args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(Exit {
            status: args.first().map(|s| s.to_string()),
        })
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let status = match self.status.as_deref().map(str::parse::<ExitCode>) {
            None => 0,
            Some(Ok(code)) => code,
            Some(Err(_)) => {
                writeln!(stderr, "exit: numeric argument required")?;
                2
            }
        };
        env.request_exit(status);
        Ok(status)
    }
}

/// Write the arguments to standard output, separated by spaces.
/// A leading `-n` drops the trailing newline; every other word is printed as-is.
pub struct Echo {
    pub no_newline: bool,
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn parse(_name: &str, args: &[&str]) -> Result<Self, EarlyExit> {
        let flags = args.iter().take_while(|a| **a == "-n").count();
        Ok(Echo {
            no_newline: flags > 0,
            args: owned(&args[flags..]),
        })
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(stdout, "{}", s)?;
        } else {
            writeln!(stdout, "{}", s)?;
        }
        Ok(0)
    }
}

/// Print files to stdout. `-` or no operands read standard input.
pub struct Cat {
    pub files: Vec<String>,
}

impl BuiltinCommand for Cat {
    fn name() -> &'static str {
        "cat"
    }

    fn parse(_name: &str, args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(Cat {
            files: owned(args),
        })
    }

    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.files.is_empty() {
            std::io::copy(stdin, stdout)?;
            return Ok(0);
        }
        let mut rc = 0;
        for fname in self.files {
            if fname == "-" {
                std::io::copy(stdin, stdout)?;
                continue;
            }
            match fs::File::open(resolve(env, &fname)) {
                Ok(mut f) => {
                    std::io::copy(&mut f, stdout)?;
                }
                Err(e) => {
                    writeln!(stderr, "cat: {}: {}", fname, e)?;
                    rc = 1;
                }
            }
        }
        Ok(rc)
    }
}

#[derive(FromArgs)]
/// Mark variables for export to child processes.
/// Without arguments, print the exported environment.
pub struct Export {
    #[argh(positional, greedy)]
    /// NAME=VALUE to set and export, or NAME to export its current value.
    pub assignments: Vec<String>,
}

impl BuiltinCommand for Export {
    fn name() -> &'static str {
        "export"
    }

    fn parse(name: &str, args: &[&str]) -> Result<Self, EarlyExit> {
        Self::from_args(&[name], args)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.assignments.is_empty() {
            let mut vars: Vec<(String, String)> = env::vars().collect();
            vars.sort();
            for (k, v) in vars {
                writeln!(stdout, "{}={}", k, v)?;
            }
            return Ok(0);
        }

        for arg in &self.assignments {
            let (name, value) = match arg.split_once('=') {
                Some((name, value)) => (name, value.to_string()),
                None => (arg.as_str(), env.get_var(arg)),
            };
            if !is_valid_name(name) {
                writeln!(stderr, "export: not a valid identifier: {}", name)?;
                return Ok(1);
            }
            env.set_var(name, value, true);
        }
        Ok(0)
    }
}

/// Evaluate conditional expressions. Returns 0 for true and 1 for false.
pub struct Test {
    pub args: Vec<String>,
}

impl Test {
    fn compare_ints(left: &str, op: &str, right: &str) -> Result<bool> {
        let parse = |s: &str| {
            s.trim()
                .parse::<i64>()
                .with_context(|| format!("integer expression expected: {}", s))
        };
        let (l, r) = (parse(left)?, parse(right)?);
        Ok(match op {
            "-eq" => l == r,
            "-ne" => l != r,
            "-lt" => l < r,
            "-le" => l <= r,
            "-gt" => l > r,
            _ => l >= r,
        })
    }

    fn evaluate(&self, env: &Environment) -> Result<bool> {
        let mut args: &[String] = &self.args;
        if let Some((last, rest)) = args.split_last() {
            if last == "]" {
                args = rest;
            }
        }

        Ok(match args {
            [] => false,
            [single] => !single.is_empty(),
            [op, operand] => match op.as_str() {
                "-f" => resolve(env, operand).is_file(),
                "-d" => resolve(env, operand).is_dir(),
                "-e" => resolve(env, operand).exists(),
                "-z" => operand.is_empty(),
                "-n" => !operand.is_empty(),
                _ => false,
            },
            [left, op, right] => match op.as_str() {
                "=" => left == right,
                "!=" => left != right,
                "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge" => {
                    Self::compare_ints(left, op, right)?
                }
                _ => false,
            },
            _ => false,
        })
    }
}

impl BuiltinCommand for Test {
    fn name() -> &'static str {
        "test"
    }

    fn aliases() -> &'static [&'static str] {
        &["["]
    }

    fn parse(_name: &str, args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(Self { args: owned(args) })
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        match self.evaluate(env) {
            Ok(true) => Ok(0),
            Ok(false) => Ok(1),
            Err(e) => {
                writeln!(stderr, "test: {:#}", e)?;
                Ok(2)
            }
        }
    }
}

/// List directory contents. Accepts `-l` (long format) and `-a` (show hidden), also combined.
pub struct Ls {
    pub long: bool,
    pub all: bool,
    pub paths: Vec<String>,
}

impl Ls {
    fn list_directory(&self, dir: &Path) -> Result<Vec<String>> {
        let mut entries: Vec<String> = fs::read_dir(dir)
            .with_context(|| format!("cannot open directory '{}'", dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| self.all || !name.starts_with('.'))
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn format_long(path: &Path, name: &str) -> Result<String> {
        let meta = fs::metadata(path).with_context(|| format!("cannot stat '{}'", name))?;
        let file_type = if meta.is_dir() { 'd' } else { '-' };
        Ok(format!(
            "{}{} {:>8} {}",
            file_type,
            permission_string(&meta),
            meta.len(),
            name
        ))
    }
}

#[cfg(unix)]
fn permission_string(meta: &fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    let mode = meta.permissions().mode();
    let flags = ['r', 'w', 'x'];
    (0..9)
        .map(|i| {
            if mode & (0o400 >> i) != 0 {
                flags[i % 3]
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(not(unix))]
fn permission_string(meta: &fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "r--r--r--".to_string()
    } else {
        "rw-rw-rw-".to_string()
    }
}

impl BuiltinCommand for Ls {
    fn name() -> &'static str {
        "ls"
    }

    fn parse(_name: &str, args: &[&str]) -> Result<Self, EarlyExit> {
        let mut ls = Ls {
            long: false,
            all: false,
            paths: Vec::new(),
        };
        for arg in args {
            if let Some(flags) = arg.strip_prefix('-').filter(|f| !f.is_empty()) {
                ls.long |= flags.contains('l');
                ls.all |= flags.contains('a');
            } else {
                ls.paths.push(arg.to_string());
            }
        }
        if ls.paths.is_empty() {
            ls.paths.push(".".to_string());
        }
        Ok(ls)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let multiple = self.paths.len() > 1;
        let mut rc = 0;

        for path in &self.paths {
            let full = resolve(env, path);
            if full.is_dir() {
                if multiple {
                    writeln!(stdout, "{}:", path)?;
                }
                let entries = match self.list_directory(&full) {
                    Ok(entries) => entries,
                    Err(e) => {
                        writeln!(stderr, "ls: {:#}", e)?;
                        rc = 1;
                        continue;
                    }
                };
                for name in entries {
                    if self.long {
                        writeln!(stdout, "{}", Self::format_long(&full.join(&name), &name)?)?;
                    } else {
                        writeln!(stdout, "{}", name)?;
                    }
                }
                if multiple {
                    writeln!(stdout)?;
                }
            } else if full.exists() {
                if self.long {
                    writeln!(stdout, "{}", Self::format_long(&full, path)?)?;
                } else {
                    writeln!(stdout, "{}", path)?;
                }
            } else {
                writeln!(stderr, "ls: cannot access '{}'", path)?;
                rc = 1;
            }
        }
        Ok(rc)
    }
}

/// Remove files, or directories with `-r`. `-f` ignores missing files and most errors.
pub struct Rm {
    pub recursive: bool,
    pub force: bool,
    pub paths: Vec<String>,
    invalid_option: Option<char>,
}

fn has_parent_ref(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
}

impl Rm {
    /// Refuse `..` components and the filesystem root before a recursive removal.
    fn check_recursive_target(path: &str, full: &Path) -> Option<String> {
        if has_parent_ref(path) {
            return Some(format!("refusing to remove '{}': contains '..'", path));
        }
        let is_root = fs::canonicalize(full)
            .map(|p| p.parent().is_none())
            .unwrap_or(false);
        if is_root {
            return Some("refusing to remove '/' recursively".to_string());
        }
        None
    }

    fn remove(&self, full: &Path) -> Result<(), String> {
        let meta = fs::symlink_metadata(full).map_err(|e| e.to_string())?;
        if meta.is_dir() {
            if !self.recursive {
                return Err("Is a directory".to_string());
            }
            fs::remove_dir_all(full).map_err(|e| e.to_string())
        } else {
            fs::remove_file(full).map_err(|e| e.to_string())
        }
    }
}

impl BuiltinCommand for Rm {
    fn name() -> &'static str {
        "rm"
    }

    fn parse(_name: &str, args: &[&str]) -> Result<Self, EarlyExit> {
        let mut rm = Rm {
            recursive: false,
            force: false,
            paths: Vec::new(),
            invalid_option: None,
        };
        let mut parsing_opts = true;
        for arg in args {
            if parsing_opts && *arg == "--" {
                parsing_opts = false;
                continue;
            }
            if parsing_opts && arg.starts_with('-') && *arg != "-" {
                for ch in arg[1..].chars() {
                    match ch {
                        'r' | 'R' => rm.recursive = true,
                        'f' => rm.force = true,
                        other if rm.invalid_option.is_none() => rm.invalid_option = Some(other),
                        _ => {}
                    }
                }
            } else {
                parsing_opts = false;
                rm.paths.push(arg.to_string());
            }
        }
        Ok(rm)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        if let Some(ch) = self.invalid_option {
            writeln!(stderr, "rm: invalid option -- '{}'", ch)?;
            return Ok(2);
        }
        if self.paths.is_empty() {
            writeln!(stderr, "rm: missing operand")?;
            return Ok(1);
        }

        let mut rc = 0;
        for path in &self.paths {
            let full = resolve(env, path);
            if self.recursive {
                if let Some(reason) = Self::check_recursive_target(path, &full) {
                    if !self.force {
                        writeln!(stderr, "rm: {}", reason)?;
                        rc = 1;
                    }
                    continue;
                }
            }
            if let Err(reason) = self.remove(&full) {
                let missing = !full.exists() && fs::symlink_metadata(&full).is_err();
                if !(self.force && missing) {
                    writeln!(stderr, "rm: cannot remove '{}': {}", path, reason)?;
                    rc = 1;
                }
            }
        }
        Ok(rc)
    }
}

/// Do nothing, successfully.
pub struct True;

impl BuiltinCommand for True {
    fn name() -> &'static str {
        "true"
    }

    fn parse(_name: &str, _args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(True)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        Ok(0)
    }
}

/// Do nothing, unsuccessfully.
pub struct False;

impl BuiltinCommand for False {
    fn name() -> &'static str {
        "false"
    }

    fn parse(_name: &str, _args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(False)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        Ok(1)
    }
}
