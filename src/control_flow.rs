//! `if`/`elif`/`else`/`fi` blocks.
//!
//! The parser only slices the block into raw token runs. Each run is handed to
//! [`parse_command_list`] when the block executes, so interpolation sees the
//! variables and `$?` of that moment.

use crate::command::{CommandExecutor, ExitCode};
use crate::env::Environment;
use crate::error::ParsingError;
use crate::parser::parse_command_list;
use tracing::{debug, trace};

/// One `if`/`elif` arm: the condition run and the body run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub condition: Vec<String>,
    pub body: Vec<String>,
}

/// A parsed `if` block. There is always at least one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfStatement {
    pub branches: Vec<Branch>,
    pub else_body: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IfState {
    /// After `if` or `elif`, collecting a condition.
    Condition,
    /// After `then`, collecting a branch body.
    Body,
    /// After `else`, collecting the else body.
    ElseBody,
    /// After `fi`; only `;` may follow.
    Done,
}

impl IfState {
    fn describe(self) -> &'static str {
        match self {
            IfState::Condition => "in condition",
            IfState::Body => "in body",
            IfState::ElseBody => "in else body",
            IfState::Done => "after fi",
        }
    }
}

struct IfParser {
    state: IfState,
    branches: Vec<Branch>,
    else_body: Option<Vec<String>>,
    condition: Vec<String>,
    run: Vec<String>,
    trailing: Vec<String>,
}

impl IfParser {
    fn new() -> Self {
        IfParser {
            state: IfState::Condition,
            branches: Vec::new(),
            else_body: None,
            condition: Vec::new(),
            run: Vec::new(),
            trailing: Vec::new(),
        }
    }

    fn unexpected(&self, keyword: &str) -> ParsingError {
        ParsingError::UnexpectedKeyword {
            keyword: keyword.to_string(),
            state: self.state.describe(),
        }
    }

    fn close_branch(&mut self) {
        self.branches.push(Branch {
            condition: std::mem::take(&mut self.condition),
            body: std::mem::take(&mut self.run),
        });
    }

    fn feed(&mut self, tok: &str) -> Result<(), ParsingError> {
        use IfState::*;

        match (self.state, tok) {
            (Done, ";") => {}
            (Done, _) => self.trailing.push(tok.to_string()),

            (Condition, "then") => {
                self.condition = std::mem::take(&mut self.run);
                self.state = Body;
            }
            (Body, "elif") => {
                self.close_branch();
                self.state = Condition;
            }
            (Body, "else") => {
                self.close_branch();
                self.state = ElseBody;
            }
            (Body, "fi") => {
                self.close_branch();
                self.state = Done;
            }
            (ElseBody, "fi") => {
                self.else_body = Some(std::mem::take(&mut self.run));
                self.state = Done;
            }
            (_, "if" | "then" | "elif" | "else" | "fi") => return Err(self.unexpected(tok)),

            _ => self.run.push(tok.to_string()),
        }
        Ok(())
    }

    fn finish(self) -> Result<IfStatement, ParsingError> {
        match self.state {
            IfState::Condition => Err(ParsingError::MissingThen),
            IfState::Body | IfState::ElseBody => Err(ParsingError::MissingFi),
            IfState::Done if !self.trailing.is_empty() => {
                Err(ParsingError::TrailingTokens(self.trailing))
            }
            IfState::Done => Ok(IfStatement {
                branches: self.branches,
                else_body: self.else_body,
            }),
        }
    }
}

/// Parse `if <cond> then <body> (elif <cond> then <body>)* (else <body>)? fi`.
///
/// Condition and body runs may contain `;` tokens; only `;` may follow `fi`.
///
/// Keywords are recognized wherever they appear as whole tokens, including in
/// argument position: `if true; then echo fi; fi` ends the block at the first
/// `fi`. Quoting does not help since tokens arrive unquoted. The multi-line
/// reader counts only keywords in command position, so such a block is still
/// collected whole before it is rejected here.
pub fn parse_if_tokens(tokens: &[String]) -> Result<IfStatement, ParsingError> {
    let Some((first, rest)) = tokens.split_first() else {
        return Err(ParsingError::MissingIf);
    };
    if first != "if" {
        return Err(ParsingError::MissingIf);
    }

    let mut parser = IfParser::new();
    for tok in rest {
        parser.feed(tok)?;
    }
    let stmt = parser.finish()?;
    debug!(
        branches = stmt.branches.len(),
        has_else = stmt.else_body.is_some(),
        "parsed if statement"
    );
    Ok(stmt)
}

impl IfStatement {
    /// Evaluate the branches in order and run the first body whose condition holds.
    ///
    /// A condition is true when its last command returns 0; an empty condition is
    /// false. Conditions of later branches are not evaluated once one holds.
    ///
    /// # Returns
    ///
    /// The status of the last body command executed, or 0 if no body command ran.
    pub fn execute(
        &self,
        env: &mut Environment,
        executor: &mut dyn CommandExecutor,
    ) -> Result<ExitCode, ParsingError> {
        for (idx, branch) in self.branches.iter().enumerate() {
            let holds = Self::evaluate_condition(&branch.condition, env, executor)?;
            trace!(branch = idx, holds, "evaluated condition");
            if env.exit_requested() {
                return Ok(env.last_status);
            }
            if holds {
                return Self::run_body(&branch.body, env, executor);
            }
        }

        match &self.else_body {
            Some(body) => Self::run_body(body, env, executor),
            None => Ok(0),
        }
    }

    fn evaluate_condition(
        tokens: &[String],
        env: &mut Environment,
        executor: &mut dyn CommandExecutor,
    ) -> Result<bool, ParsingError> {
        let commands = parse_command_list(tokens, env)?;
        let mut status = None;
        for cmd in &commands {
            let code = executor.execute(cmd, env);
            env.set_status(code);
            status = Some(code);
            if env.exit_requested() {
                break;
            }
        }
        Ok(status == Some(0))
    }

    fn run_body(
        tokens: &[String],
        env: &mut Environment,
        executor: &mut dyn CommandExecutor,
    ) -> Result<ExitCode, ParsingError> {
        let commands = parse_command_list(tokens, env)?;
        let mut status = 0;
        for cmd in &commands {
            status = executor.execute(cmd, env);
            env.set_status(status);
            if env.exit_requested() {
                break;
            }
        }
        Ok(status)
    }
}
