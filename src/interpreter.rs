use crate::block_reader::read_if_block;
use crate::command::{
    Command, CommandExecutor, CommandFactory, ExitCode, NOT_FOUND, Redirect, Stdin, Stdout,
    Streams,
};
use crate::control_flow::parse_if_tokens;
use crate::env::Environment;
use crate::error::{ParsingError, RedirectError, ShellError};
use crate::external::ExternalCommand;
use crate::input::{EditorSource, LineSource, ReadError, read_logical_line};
use crate::lexer::split_into_tokens;
use crate::parser::{parse_simple_command, split_on_semicolons};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::process::Stdio;
use tracing::{debug, warn};

/// Status left behind when reading is interrupted with Ctrl-C.
const INTERRUPTED: ExitCode = 130;
/// Status left behind by a line that fails to lex or parse.
const SYNTAX_ERROR: ExitCode = 2;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports commands defined in this crate: builtins and ExternalCommand.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// What the read-eval loop should do after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading; carries the status of the line.
    Continue(ExitCode),
    /// `exit` ran; the session ends with this status.
    Exit(ExitCode),
}

/// Resolves command names and runs them with their redirections in place.
///
/// Registered factories are asked in order; PATH lookup comes last.
struct Dispatcher {
    factories: Vec<Box<dyn CommandFactory>>,
    external: Factory<ExternalCommand>,
}

fn open_output(env: &Environment, redirect: &Redirect) -> Result<File, RedirectError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .append(redirect.append)
        .truncate(!redirect.append)
        .open(env.current_dir.join(&redirect.path))
        .map_err(|e| RedirectError::new(&redirect.path, e))
}

fn output_or(
    env: &Environment,
    redirect: Option<&Redirect>,
    inherited: impl FnOnce() -> Box<dyn Stdout>,
) -> Result<Box<dyn Stdout>, RedirectError> {
    match redirect {
        Some(r) => Ok(Box::new(open_output(env, r)?)),
        None => Ok(inherited()),
    }
}

/// Open every redirection of `cmd`, falling back to the shell's own streams.
fn open_streams(cmd: &Command, env: &Environment) -> Result<Streams, RedirectError> {
    let stdin: Box<dyn Stdin> = match &cmd.stdin {
        Some(path) => Box::new(
            File::open(env.current_dir.join(path)).map_err(|e| RedirectError::new(path, e))?,
        ),
        None => Box::new(InheritedStdin(std::io::stdin().lock())),
    };

    let (stdout, stderr): (Box<dyn Stdout>, Box<dyn Stdout>) = match (cmd.combined, &cmd.stdout) {
        (true, Some(target)) => {
            let file = open_output(env, target)?;
            let shared = file
                .try_clone()
                .map_err(|e| RedirectError::new(&target.path, e))?;
            let stdout: Box<dyn Stdout> = Box::new(file);
            let stderr: Box<dyn Stdout> = Box::new(shared);
            (stdout, stderr)
        }
        _ => (
            output_or(env, cmd.stdout.as_ref(), || Box::new(std::io::stdout()))?,
            output_or(env, cmd.stderr.as_ref(), || Box::new(std::io::stderr()))?,
        ),
    };

    Ok(Streams {
        stdin,
        stdout,
        stderr,
    })
}

/// Write `message` where the command's stderr goes.
///
/// The command's own handle is gone by the time its execution fails, so a
/// redirected stderr is reopened for appending.
fn report_failure(cmd: &Command, env: &Environment, message: &str) {
    let reopened = cmd.stderr.as_ref().map(|r| {
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(env.current_dir.join(&r.path))
    });
    match reopened {
        Some(Ok(mut file)) => {
            let _ = writeln!(file, "{}", message);
        }
        _ => eprintln!("{}", message),
    }
}

impl CommandExecutor for Dispatcher {
    fn execute(&mut self, cmd: &Command, env: &mut Environment) -> ExitCode {
        let streams = match open_streams(cmd, env) {
            Ok(streams) => streams,
            Err(err) => {
                eprintln!("shell: {}", err);
                return 1;
            }
        };

        let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
        let created = self
            .factories
            .iter()
            .find_map(|f| f.try_create(env, &cmd.name, &args))
            .or_else(|| self.external.try_create(env, &cmd.name, &args));

        let Some(command) = created else {
            let mut stderr = streams.stderr;
            let _ = writeln!(stderr, "{}: command not found", cmd.name);
            return NOT_FOUND;
        };

        debug!(name = %cmd.name, args = ?cmd.args, "dispatching");
        match command.execute(streams, env) {
            Ok(code) => code,
            Err(err) => {
                report_failure(cmd, env, &format!("{}: {:#}", cmd.name, err));
                1
            }
        }
    }
}

/// A small POSIX-flavoured shell: simple commands, redirections, `;` lists and
/// `if`/`elif`/`else`/`fi` blocks.
///
/// The interpreter maintains an [`Environment`] and a list of [`CommandFactory`] objects
/// that are queried to create commands by name. See [`Default`] for the built-in
/// factories included out of the box.
///
/// Example
/// ```
/// use shell_blocks::Interpreter;
/// let mut sh = Interpreter::default();
/// let code = sh.run("true", &[]);
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    env: Environment,
    dispatcher: Dispatcher,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of command factories.
    ///
    /// Programs on PATH are always available after the given factories.
    pub fn new(commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            env: Environment::new(),
            dispatcher: Dispatcher {
                factories: commands,
                external: Factory::default(),
            },
        }
    }

    /// Add a factory. It is consulted after the ones already registered.
    pub fn register(&mut self, factory: Box<dyn CommandFactory>) {
        self.dispatcher.factories.push(factory);
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Run a single command invocation by name with arguments, bypassing the parser.
    pub fn run(&mut self, name: &str, args: &[&str]) -> ExitCode {
        let cmd = Command::new(name, args.iter().map(|a| a.to_string()).collect());
        let status = self.dispatcher.execute(&cmd, &mut self.env);
        self.env.set_status(status);
        status
    }

    fn prompt(&self, var: &str, default: &str) -> String {
        let value = self.env.get_var(var);
        if value.is_empty() {
            default.to_string()
        } else {
            value
        }
    }

    fn flow(&self, status: ExitCode) -> Flow {
        match self.env.exit_request {
            Some(code) => Flow::Exit(code),
            None => Flow::Continue(status),
        }
    }

    /// Handle one logical line, pulling more lines from `source` if it opens an `if` block.
    pub fn run_line(
        &mut self,
        line: &str,
        source: &mut dyn LineSource,
    ) -> Result<Flow, ShellError> {
        let tokens = split_into_tokens(line).map_err(ParsingError::from)?;
        if tokens.is_empty() {
            return Ok(Flow::Continue(self.env.last_status));
        }

        if tokens[0] == "if" {
            return self.run_if_block(line, &tokens, source);
        }

        let mut status = self.env.last_status;
        for segment in split_on_semicolons(&tokens) {
            let Some(cmd) = parse_simple_command(segment, &mut self.env)? else {
                continue;
            };
            status = self.dispatcher.execute(&cmd, &mut self.env);
            self.env.set_status(status);
            if self.env.exit_requested() {
                break;
            }
        }
        Ok(self.flow(status))
    }

    fn run_if_block(
        &mut self,
        line: &str,
        tokens: &[String],
        source: &mut dyn LineSource,
    ) -> Result<Flow, ShellError> {
        let continuation = self.prompt("PS2", "> ");
        let block = match read_if_block(line, tokens, source, &continuation) {
            Ok(block) => block,
            Err(ReadError::Interrupted) => {
                self.env.set_status(INTERRUPTED);
                return Ok(Flow::Continue(INTERRUPTED));
            }
            Err(ReadError::Eof) => line.to_string(),
            Err(ReadError::Io(err)) => return Err(err.into()),
        };
        debug!(%block, "collected if block");

        let tokens = split_into_tokens(&block).map_err(ParsingError::from)?;
        let stmt = parse_if_tokens(&tokens)?;
        let status = stmt.execute(&mut self.env, &mut self.dispatcher)?;
        self.env.set_status(status);
        Ok(self.flow(status))
    }

    /// Read and run lines until end of input or `exit`.
    ///
    /// # Returns
    ///
    /// The status passed to `exit`, or Last-Status when input runs out.
    pub fn run_source(&mut self, source: &mut dyn LineSource) -> ExitCode {
        loop {
            let prompt = self.prompt("PS1", "$ ");
            let continuation = self.prompt("PS2", "> ");
            let line = match read_logical_line(source, &prompt, &continuation) {
                Ok(line) => line,
                Err(ReadError::Interrupted) => {
                    self.env.set_status(INTERRUPTED);
                    continue;
                }
                Err(ReadError::Eof) => return self.env.last_status,
                Err(ReadError::Io(err)) => {
                    eprintln!("shell: failed to read input: {}", err);
                    return 1;
                }
            };

            match self.run_line(&line, source) {
                Ok(Flow::Continue(_)) => {}
                Ok(Flow::Exit(code)) => return code,
                Err(err @ ShellError::Syntax(_)) => {
                    warn!(%line, "rejected line");
                    eprintln!("shell: {}", err);
                    self.env.set_status(SYNTAX_ERROR);
                }
                Err(err @ ShellError::Input(_)) => {
                    eprintln!("shell: {}", err);
                    return 1;
                }
            }
        }
    }

    /// Interactive Read-Eval-Print Loop with line editing and history.
    pub fn repl(&mut self) -> rustyline::Result<ExitCode> {
        let mut source = EditorSource::new()?;
        Ok(self.run_source(&mut source))
    }
}

impl Default for Interpreter {
    /// Create an interpreter with the default set of commands:
    /// - built-ins: `cat`, `cd`, `echo`, `exit`, `export`, `false`, `ls`, `pwd`,
    ///   `rm`, `test`/`[`, `true`
    /// - external command launcher
    fn default() -> Self {
        use crate::builtin::*;
        Self::new(vec![
            Box::new(Factory::<Cat>::default()),
            Box::new(Factory::<Cd>::default()),
            Box::new(Factory::<Echo>::default()),
            Box::new(Factory::<Exit>::default()),
            Box::new(Factory::<Export>::default()),
            Box::new(Factory::<False>::default()),
            Box::new(Factory::<Ls>::default()),
            Box::new(Factory::<Pwd>::default()),
            Box::new(Factory::<Rm>::default()),
            Box::new(Factory::<Test>::default()),
            Box::new(Factory::<True>::default()),
        ])
    }
}

struct InheritedStdin<'a>(std::io::StdinLock<'a>);

impl Read for InheritedStdin<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Stdin for InheritedStdin<'_> {
    fn stdio(self: Box<Self>) -> Stdio {
        Stdio::inherit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::tests::lock_process_state;
    use crate::input::ScriptSource;
    use std::fs;
    use std::io::Cursor;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn make_unique_temp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "interpreter_{}_{}_{}",
            tag,
            std::process::id(),
            nanos
        ));
        fs::create_dir_all(&dir).expect("failed to create temp dir");
        fs::canonicalize(dir).expect("failed to canonicalize temp dir")
    }

    /// Runs `script` in a fresh interpreter rooted at `dir`.
    fn run_script(dir: &Path, script: &str) -> (Interpreter, ExitCode) {
        let mut sh = Interpreter::default();
        sh.env_mut().current_dir = dir.to_path_buf();
        let mut source = ScriptSource::new(Cursor::new(script.as_bytes().to_vec()));
        let status = sh.run_source(&mut source);
        (sh, status)
    }

    fn read(dir: &Path, name: &str) -> String {
        fs::read_to_string(dir.join(name)).unwrap_or_else(|e| panic!("{name}: {e}"))
    }

    #[test]
    fn test_stdout_redirection_truncates_and_appends() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("stdout");

        let script = "echo hello > out.txt\necho a >> app.txt; echo b >> app.txt\n";
        let (_, status) = run_script(&dir, script);
        assert_eq!(status, 0);
        assert_eq!(read(&dir, "out.txt"), "hello\n");
        assert_eq!(read(&dir, "app.txt"), "a\nb\n");

        run_script(&dir, "echo again > out.txt\n");
        assert_eq!(read(&dir, "out.txt"), "again\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_stderr_and_combined_redirection() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("stderr");

        let (_, status) = run_script(&dir, "cat missing.txt 2> err.txt\n");
        assert_eq!(status, 1);
        assert!(read(&dir, "err.txt").starts_with("cat: missing.txt:"));

        run_script(&dir, "echo first &> both.txt\nls nope &>> both.txt\n");
        assert_eq!(read(&dir, "both.txt"), "first\nls: cannot access 'nope'\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_stdin_redirection() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("stdin");
        fs::write(dir.join("in.txt"), "payload\n").unwrap();

        run_script(&dir, "cat < in.txt > out.txt\n");
        assert_eq!(read(&dir, "out.txt"), "payload\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_unopenable_redirect_fails_command() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("badredir");

        let (_, status) = run_script(&dir, "echo x > no_such_dir/out.txt\n");
        assert_eq!(status, 1);
        let (_, status) = run_script(&dir, "cat < absent.txt\n");
        assert_eq!(status, 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_multiline_if_block() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("if");
        let script = "\
X=5
if test $X -gt 3
then
  echo big > out.txt
else
  echo small > out.txt
fi
";
        let (_, status) = run_script(&dir, script);
        assert_eq!(status, 0);
        assert_eq!(read(&dir, "out.txt"), "big\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_elif_chain_on_one_line() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("elif");

        run_script(
            &dir,
            "if false; then echo 1 > out.txt; \
             elif true; then echo 2 > out.txt; \
             else echo 3 > out.txt; fi\n",
        );
        assert_eq!(read(&dir, "out.txt"), "2\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_if_without_matching_branch_sets_zero() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("nobranch");

        run_script(&dir, "false\nif false; then echo no; fi\necho $? > rc.txt\n");
        assert_eq!(read(&dir, "rc.txt"), "0\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_last_status_and_assignments_flow_between_segments() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("status");

        run_script(&dir, "false; echo $? > rc.txt\nA=1; echo $A > a.txt\n");
        assert_eq!(read(&dir, "rc.txt"), "1\n");
        assert_eq!(read(&dir, "a.txt"), "1\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_exit_stops_the_session() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("exit");

        let (_, status) = run_script(&dir, "exit 7\necho unreachable > out.txt\n");
        assert_eq!(status, 7);
        assert!(!dir.join("out.txt").exists());

        let script = "if true; then exit 4; echo no > out.txt; fi\necho no > out.txt\n";
        let (_, status) = run_script(&dir, script);
        assert_eq!(status, 4);
        assert!(!dir.join("out.txt").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_syntax_error_sets_status_and_continues() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("syntax");

        let (_, status) = run_script(&dir, "echo >\n");
        assert_eq!(status, 2);

        let (sh, status) = run_script(&dir, "echo 'open\necho after > out.txt\n");
        assert_eq!(status, 0);
        assert_eq!(sh.env().last_status, 0);
        assert_eq!(read(&dir, "out.txt"), "after\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_eof_inside_if_block_is_syntax_error() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("eof");

        let (_, status) = run_script(&dir, "if true\nthen\necho x > out.txt\n");
        assert_eq!(status, 2);
        assert!(!dir.join("out.txt").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_unknown_command_is_127() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("notfound");

        let (_, status) = run_script(&dir, "definitely_not_a_command_xyz 2> err.txt\n");
        assert_eq!(status, NOT_FOUND);
        assert_eq!(
            read(&dir, "err.txt"),
            "definitely_not_a_command_xyz: command not found\n"
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    #[cfg(unix)]
    fn test_external_command_status_and_exported_vars() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("external");

        let (_, status) = run_script(&dir, "/bin/sh -c 'exit 5'\n");
        assert_eq!(status, 5);

        run_script(
            &dir,
            "export SHELL_BLOCKS_TEST_VAR=visible\n\
             /bin/sh -c 'echo $SHELL_BLOCKS_TEST_VAR' > out.txt\n",
        );
        assert_eq!(read(&dir, "out.txt"), "visible\n");
        unsafe { std::env::remove_var("SHELL_BLOCKS_TEST_VAR") };
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_run_by_name_updates_status() {
        let mut sh = Interpreter::default();
        assert_eq!(sh.run("false", &[]), 1);
        assert_eq!(sh.env().last_status, 1);
        assert_eq!(sh.run("true", &[]), 0);
        assert_eq!(sh.env().last_status, 0);
    }

    #[test]
    fn test_registered_factory_is_consulted() {
        let mut sh = Interpreter::new(Vec::new());
        assert_eq!(sh.run("exit", &["3"]), NOT_FOUND);
        assert!(!sh.env().exit_requested());

        sh.register(Box::new(Factory::<crate::builtin::Exit>::default()));
        assert_eq!(sh.run("exit", &["3"]), 3);
        assert_eq!(sh.env().exit_request, Some(3));
    }

    #[test]
    #[cfg(unix)]
    fn test_combined_redirect_shares_one_handle() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("shared");

        let (_, status) = run_script(&dir, "/bin/sh -c 'echo a; echo b >&2; echo c' &> both.txt\n");
        assert_eq!(status, 0);
        assert_eq!(read(&dir, "both.txt"), "a\nb\nc\n");

        run_script(&dir, "/bin/sh -c 'echo d >&2; echo e' &>> both.txt\n");
        assert_eq!(read(&dir, "both.txt"), "a\nb\nc\nd\ne\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    #[cfg(unix)]
    fn test_spawn_failure_goes_to_redirected_stderr() {
        use std::os::unix::fs::PermissionsExt;
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("spawnfail");
        let tool = dir.join("tool");
        fs::write(&tool, b"\x00\x01\x02\x03").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let (_, status) = run_script(&dir, "./tool 2> err.txt\n");
        assert_eq!(status, 1);
        assert!(read(&dir, "err.txt").starts_with("./tool: failed to spawn"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_dash_arguments_reach_builtins() {
        let _lock = lock_process_state();
        let dir = make_unique_temp_dir("dash");

        let (_, status) = run_script(&dir, "echo -x hello > dash.txt 2> dash_err.txt\n");
        assert_eq!(status, 0);
        assert_eq!(read(&dir, "dash.txt"), "-x hello\n");
        assert_eq!(read(&dir, "dash_err.txt"), "");

        let (_, status) = run_script(&dir, "exit -1\n");
        assert_eq!(status, -1);
        let _ = fs::remove_dir_all(dir);
    }
}
