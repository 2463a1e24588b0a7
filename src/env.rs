use crate::command::ExitCode;
use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

static VAR_NAME_RX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Returns true if `name` may be used as a shell variable name.
pub fn is_valid_name(name: &str) -> bool {
    VAR_NAME_RX.is_match(name)
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Session state shared by every parse and execute call.
///
/// The environment contains:
/// - `vars`: shell-local variables. Exported ones are additionally mirrored into the
///   process environment, so spawned children inherit them.
/// - `current_dir`: the working directory for command execution.
/// - `last_status`: status of the most recently completed command, read by `$?`.
/// - `exit_request`: set by the `exit` builtin; the read-eval loop stops once it is present.
#[derive(Debug, Clone)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    pub current_dir: PathBuf,
    pub last_status: ExitCode,
    pub exit_request: Option<ExitCode>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Start a fresh session in the current process directory with no local variables.
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            vars: HashMap::new(),
            current_dir,
            last_status: 0,
            exit_request: None,
        }
    }

    /// Get the value of a variable.
    ///
    /// Looks up the local store first, falling back to the process environment,
    /// and finally to the empty string.
    pub fn get_var(&self, key: &str) -> String {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
            .unwrap_or_default()
    }

    /// Set a local variable, mirroring it into the process environment when `export` is set.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>, export: bool) {
        let key = key.into();
        let val = val.into();
        if export {
            // SAFETY: the session runs on a single thread; no other thread reads the
            // process environment while a command is being executed.
            unsafe { stdenv::set_var(&key, &val) };
        }
        self.vars.insert(key, val);
    }

    pub fn set_status(&mut self, status: ExitCode) {
        self.last_status = status;
    }

    /// Ask the read-eval loop to stop after the current unit with `status`.
    pub fn request_exit(&mut self, status: ExitCode) {
        self.exit_request = Some(status);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_request.is_some()
    }

    /// Expand `$?`, `${NAME}` and `$NAME` inside a single token.
    ///
    /// A `$` that does not start one of those forms is copied literally, and
    /// expanded values are never re-scanned.
    pub fn interpolate(&self, token: &str) -> String {
        if !token.contains('$') {
            return token.to_string();
        }

        let chars: Vec<char> = token.chars().collect();
        let mut result = String::with_capacity(token.len());
        let mut i = 0;

        while i < chars.len() {
            if chars[i] != '$' {
                result.push(chars[i]);
                i += 1;
                continue;
            }

            match chars.get(i + 1) {
                Some('?') => {
                    result.push_str(&self.last_status.to_string());
                    i += 2;
                }
                Some('{') => {
                    let start = i + 2;
                    let mut end = start;
                    while end < chars.len() && is_name_char(chars[end]) {
                        end += 1;
                    }
                    if end > start && chars.get(end) == Some(&'}') {
                        let name: String = chars[start..end].iter().collect();
                        result.push_str(&self.get_var(&name));
                        i = end + 1;
                    } else {
                        result.push('$');
                        i += 1;
                    }
                }
                Some(&c) if c.is_alphabetic() || c == '_' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && is_name_char(chars[end]) {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    result.push_str(&self.get_var(&name));
                    i = end;
                }
                _ => {
                    result.push('$');
                    i += 1;
                }
            }
        }

        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::env::{Environment, is_valid_name};
    use std::sync::{Mutex, MutexGuard, OnceLock};

    /// Serializes tests that touch the process environment or current directory.
    pub(crate) fn lock_process_state() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = Environment::new();

        // initially absent
        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), "");

        env.set_var("KEY", "VALUE", false);

        assert_eq!(env.get_var("KEY"), "VALUE");
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(!env.get_var("PATH").is_empty());
    }

    #[test]
    fn test_local_value_wins_over_process_env() {
        let mut env = Environment::new();
        env.set_var("PATH", "/only/local", false);
        assert_eq!(env.get_var("PATH"), "/only/local");
        assert_ne!(std::env::var("PATH").unwrap(), "/only/local");
    }

    #[test]
    fn test_export_mirrors_into_process_env() {
        let _lock = lock_process_state();
        let name = format!("SHELL_BLOCKS_EXPORT_{}", std::process::id());
        let mut env = Environment::new();

        env.set_var(&name, "local", false);
        assert!(std::env::var(&name).is_err());

        env.set_var(&name, "shared", true);
        assert_eq!(std::env::var(&name).unwrap(), "shared");
        assert_eq!(env.get_var(&name), "shared");

        unsafe { std::env::remove_var(&name) };
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("_x1"));
        assert!(is_valid_name("PATH"));
        assert!(!is_valid_name("1x"));
        assert!(!is_valid_name("a-b"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_interpolate_without_dollar_is_identity() {
        let env = Environment::new();
        for token in ["", "plain", "a{b}c", "50%"] {
            assert_eq!(env.interpolate(token), token);
        }
    }

    #[test]
    fn test_interpolate_bare_and_braced() {
        let mut env = Environment::new();
        env.set_var("NAME", "world", false);
        assert_eq!(env.interpolate("hello $NAME!"), "hello world!");
        assert_eq!(env.interpolate("${NAME}wide"), "worldwide");
        assert_eq!(env.interpolate("$NAMEwide"), "");
        assert_eq!(env.interpolate("${UNSET_VAR_FOR_TEST_42}"), "");
    }

    #[test]
    fn test_interpolate_last_status() {
        let mut env = Environment::new();
        env.set_status(7);
        assert_eq!(env.interpolate("rc=$?"), "rc=7");
    }

    #[test]
    fn test_interpolate_keeps_literal_dollars() {
        let mut env = Environment::new();
        env.set_var("A", "1", false);
        assert_eq!(env.interpolate("cost$"), "cost$");
        assert_eq!(env.interpolate("$$A"), "$1");
        assert_eq!(env.interpolate("$1"), "$1");
        assert_eq!(env.interpolate("${}"), "${}");
        assert_eq!(env.interpolate("${A"), "${A");
        assert_eq!(env.interpolate("${A-b}"), "${A-b}");
    }

    #[test]
    fn test_interpolate_does_not_rescan_values() {
        let mut env = Environment::new();
        env.set_var("A", "$B", false);
        env.set_var("B", "nope", false);
        assert_eq!(env.interpolate("$A"), "$B");
    }
}
