//! Collects the physical lines of a multi-line `if` block before it is parsed.

use crate::input::{LineSource, ReadError, read_logical_line};
use crate::lexer::split_into_tokens;
use tracing::{debug, trace};

/// Separator used to join collected lines into one token stream.
pub const LINE_JOINER: &str = " ; ";

/// Net change of `if` nesting contributed by `tokens`.
///
/// Only keywords in command position count: the first token, or a token right
/// after `;`. `echo if` or `test fi` leave the depth alone.
pub fn if_nesting_delta(tokens: &[String]) -> isize {
    let mut at_cmd_start = true;
    let mut delta = 0;
    for tok in tokens {
        if tok == ";" {
            at_cmd_start = true;
            continue;
        }
        if at_cmd_start {
            match tok.as_str() {
                "if" => delta += 1,
                "fi" => delta -= 1,
                _ => {}
            }
            at_cmd_start = false;
        }
    }
    delta
}

/// Keep reading logical lines until `nesting` drops to zero.
///
/// Lines that fail to lex (an open quote) contribute nothing. End of input stops
/// collection early and returns the lines read so far.
pub fn read_until_fi(
    source: &mut dyn LineSource,
    mut nesting: isize,
    prompt: &str,
) -> Result<Vec<String>, ReadError> {
    let mut lines = Vec::new();

    while nesting > 0 {
        let line = match read_logical_line(source, prompt, prompt) {
            Ok(line) => line,
            Err(ReadError::Eof) => {
                debug!(nesting, "input ended inside if block");
                break;
            }
            Err(err) => return Err(err),
        };

        match split_into_tokens(&line) {
            Ok(tokens) => nesting += if_nesting_delta(&tokens),
            Err(err) => trace!(%err, "line gives no keyword signal"),
        }
        lines.push(line);
    }

    Ok(lines)
}

/// Gather a whole `if` block starting with `first_line` and join it for re-lexing.
pub fn read_if_block(
    first_line: &str,
    first_tokens: &[String],
    source: &mut dyn LineSource,
    prompt: &str,
) -> Result<String, ReadError> {
    let mut lines = vec![first_line.to_string()];
    let nesting = if_nesting_delta(first_tokens);
    if nesting > 0 {
        lines.extend(read_until_fi(source, nesting, prompt)?);
    }
    Ok(lines.join(LINE_JOINER))
}
