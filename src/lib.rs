//! A small POSIX-flavoured shell front-end.
//!
//! Lines are tokenized by [`lexer`], expanded against the session [`env`] and
//! the filesystem, and turned into [`command::Command`] values carrying their
//! redirections. `if`/`elif`/`else`/`fi` blocks may span several input lines:
//! [`block_reader`] gathers them and [`control_flow`] parses and runs them.
//!
//! The main entry point is [`Interpreter`], which owns the session state and
//! dispatches commands to builtins or to programs found on `PATH`.

pub mod block_reader;
mod builtin;
pub mod command;
pub mod control_flow;
pub mod env;
pub mod error;
mod external;
pub mod input;
mod interpreter;
pub mod lexer;
pub mod parser;
pub mod wildcard;

/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::{Flow, Interpreter};
