//! A module implementing lexical analysis (tokenization) for a simple shell-like language.
//!
//! Tokens are plain strings. Quotes are removed while lexing, so the parser
//! recognizes operators and keywords by exact match only.

use crate::error::LexingError;
use tracing::trace;

/// Characters that end the preceding word even without surrounding whitespace.
const PUNCTUATION: [char; 5] = [';', '&', '<', '>', '|'];

/// Operators that collapse into a doubled form when written as two separate tokens.
const DOUBLING: [&str; 4] = [">", "<", "&", "|"];

fn is_punctuation(ch: char) -> bool {
    PUNCTUATION.contains(&ch)
}

/// Token with the knowledge of whether it came from unquoted punctuation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawToken {
    text: String,
    operator: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingOperator,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
    out: Vec<RawToken>,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
            out: Vec::new(),
        }
    }

    /// Runs the machine over the whole input.
    ///
    /// Fails when the input ends inside a quoted region or right after a backslash.
    fn make_tokens(mut self) -> Result<Vec<RawToken>, LexingError> {
        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch)?,
                LexingState::ReadingWord => self.handle_word(ch)?,
                LexingState::ReadingOperator => self.handle_operator(ch)?,
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch),
            }
        }

        match self.state {
            LexingState::ReadingSingleQuote => return Err(LexingError::UnfinishedQuote('\'')),
            LexingState::ReadingDoubleQuote => return Err(LexingError::UnfinishedQuote('"')),
            LexingState::ReadingWord => self.finish(false),
            LexingState::ReadingOperator => self.finish(true),
            LexingState::Start => {}
        }

        Ok(self.out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    /// Pushes the buffer as a token. Words may be empty (`""`), operators never are.
    fn finish(&mut self, operator: bool) {
        self.out.push(RawToken {
            text: std::mem::take(&mut self.buffer),
            operator,
        });
        self.state = LexingState::Start;
    }

    fn handle_start(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            c if c.is_whitespace() => {}
            ';' => {
                self.buffer.push(';');
                self.finish(true);
            }
            c if is_punctuation(c) => {
                self.buffer.push(c);
                self.state = LexingState::ReadingOperator;
            }
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            '\\' => {
                self.escape()?;
                self.state = LexingState::ReadingWord;
            }
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
        Ok(())
    }

    fn handle_word(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            c if c.is_whitespace() => self.finish(false),
            c if is_punctuation(c) => {
                self.finish(false);
                self.handle_start(c)?;
            }
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            '\\' => self.escape()?,
            c => self.buffer.push(c),
        }
        Ok(())
    }

    /// Runs of punctuation form one operator token (`>>`, `&>`, `&>>`); `;` always stands alone.
    fn handle_operator(&mut self, ch: char) -> Result<(), LexingError> {
        if is_punctuation(ch) && ch != ';' {
            self.buffer.push(ch);
            return Ok(());
        }
        self.finish(true);
        self.handle_start(ch)
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::ReadingWord,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '"' => self.state = LexingState::ReadingWord,
            '\\' if matches!(self.peek_char(), Some('"') | Some('\\')) => {
                if let Some(next) = self.read_char() {
                    self.buffer.push(next);
                }
            }
            c => self.buffer.push(c),
        }
    }

    fn escape(&mut self) -> Result<(), LexingError> {
        match self.read_char() {
            Some(next) => {
                self.buffer.push(next);
                Ok(())
            }
            None => Err(LexingError::DanglingEscape),
        }
    }
}

/// Merges two adjacent identical operator tokens such as `> >` into `>>`.
fn collapse_doubled(tokens: Vec<RawToken>) -> Vec<String> {
    let mut result = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        let doubles = token.operator
            && DOUBLING.contains(&token.text.as_str())
            && iter
                .peek()
                .is_some_and(|next| next.operator && next.text == token.text);
        if doubles {
            iter.next();
            result.push(token.text.repeat(2));
        } else {
            result.push(token.text);
        }
    }
    result
}

/// The main entry point function to perform lexical analysis.
///
/// Whitespace separates tokens except inside single or double quotes, where
/// whitespace and punctuation are literal. `;`, `&`, `<`, `>` and `|` end the
/// preceding token.
///
/// # Returns
/// The tokens with quotes removed, or a [`LexingError`] on unterminated quoting.
pub fn split_into_tokens(line: &str) -> Result<Vec<String>, LexingError> {
    let raw = LexingFSM::new(line).make_tokens()?;
    let tokens = collapse_doubled(raw);
    trace!(?tokens, "lexed line");
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(line: &str) -> Vec<String> {
        split_into_tokens(line).unwrap()
    }

    #[test]
    fn test_splits_on_whitespace() {
        assert_eq!(lex("  echo   hello\tworld "), vec!["echo", "hello", "world"]);
        assert!(lex("").is_empty());
    }

    #[test]
    fn test_quotes_keep_whitespace_and_punctuation() {
        assert_eq!(lex("echo 'a; b' \"c > d\""), vec!["echo", "a; b", "c > d"]);
        assert_eq!(lex("echo pre'fix'\"post\""), vec!["echo", "prefixpost"]);
    }

    #[test]
    fn test_empty_quotes_produce_empty_token() {
        assert_eq!(lex("test -z \"\""), vec!["test", "-z", ""]);
        assert_eq!(lex("echo ''"), vec!["echo", ""]);
    }

    #[test]
    fn test_punctuation_ends_words() {
        assert_eq!(lex("echo a;echo b"), vec!["echo", "a", ";", "echo", "b"]);
        assert_eq!(lex("cat<in.txt>out.txt"), vec!["cat", "<", "in.txt", ">", "out.txt"]);
        assert_eq!(lex("cmd 2>err.txt"), vec!["cmd", "2", ">", "err.txt"]);
    }

    #[test]
    fn test_doubled_operators() {
        assert_eq!(lex("echo a >> log"), vec!["echo", "a", ">>", "log"]);
        assert_eq!(lex("a && b || c"), vec!["a", "&&", "b", "||", "c"]);
        assert_eq!(lex("echo > > f"), vec!["echo", ">>", "f"]);
        assert_eq!(lex("cmd &>> both"), vec!["cmd", "&>>", "both"]);
    }

    #[test]
    fn test_semicolons_stand_alone() {
        assert_eq!(lex("fi;;"), vec!["fi", ";", ";"]);
    }

    #[test]
    fn test_quoted_operators_do_not_collapse() {
        assert_eq!(lex("echo '>' '>'"), vec!["echo", ">", ">"]);
    }

    #[test]
    fn test_backslash_escapes() {
        assert_eq!(lex(r"echo a\ b \;"), vec!["echo", "a b", ";"]);
        assert_eq!(lex(r#"echo "say \"hi\"""#), vec!["echo", "say \"hi\""]);
        assert_eq!(lex(r#"echo "a\b""#), vec!["echo", r"a\b"]);
    }

    #[test]
    fn test_unterminated_quote_is_error() {
        assert_eq!(
            split_into_tokens("echo 'oops"),
            Err(LexingError::UnfinishedQuote('\''))
        );
        assert_eq!(
            split_into_tokens("echo \"oops"),
            Err(LexingError::UnfinishedQuote('"'))
        );
        assert_eq!(split_into_tokens("echo \\"), Err(LexingError::DanglingEscape));
    }
}
