//! Line sources for the read-eval loop.

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("end of input")]
    Eof,
    #[error("interrupted")]
    Interrupted,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Something that hands out one physical line at a time.
pub trait LineSource {
    /// Read a line without its terminator, showing `prompt` if the source is interactive.
    fn read_line(&mut self, prompt: &str) -> Result<String, ReadError>;
}

/// Lines from a script file, a `-c` string or any other buffered reader. Prompts are ignored.
pub struct ScriptSource<R> {
    reader: R,
}

impl<R: BufRead> ScriptSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for ScriptSource<R> {
    fn read_line(&mut self, _prompt: &str) -> Result<String, ReadError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(ReadError::Eof);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line)
    }
}

/// Interactive terminal input with line editing and history.
pub struct EditorSource {
    editor: DefaultEditor,
}

impl EditorSource {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for EditorSource {
    fn read_line(&mut self, prompt: &str) -> Result<String, ReadError> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(line)
            }
            Err(ReadlineError::Interrupted) => Err(ReadError::Interrupted),
            Err(ReadlineError::Eof) => Err(ReadError::Eof),
            Err(ReadlineError::Io(err)) => Err(ReadError::Io(err)),
            Err(err) => Err(ReadError::Io(io::Error::other(err.to_string()))),
        }
    }
}

/// Read one logical line, joining physical lines that end with a backslash.
///
/// End of input after at least one continued line yields what was collected.
pub fn read_logical_line(
    source: &mut dyn LineSource,
    prompt: &str,
    continuation_prompt: &str,
) -> Result<String, ReadError> {
    let mut joined = String::new();
    let mut prompt = prompt;
    let mut continued = false;
    loop {
        let line = match source.read_line(prompt) {
            Ok(line) => line,
            Err(ReadError::Eof) if continued => return Ok(joined),
            Err(err) => return Err(err),
        };
        match line.strip_suffix('\\') {
            Some(head) => {
                joined.push_str(head);
                prompt = continuation_prompt;
                continued = true;
            }
            None => {
                joined.push_str(&line);
                return Ok(joined);
            }
        }
    }
}
