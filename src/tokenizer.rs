/// Scanner states for [`tokenize`].
enum State {
    /// Outside quotes; an unquoted delimiter ends the token.
    Unquoted,
    /// Inside a quote pair opened by the given character.
    Quoted(char),
}

/// Split `input` on every unquoted occurrence of `delimiter`.
///
/// Quote characters are kept in the emitted tokens; the expander strips them
/// later. Consecutive delimiters produce empty tokens rather than being
/// collapsed, so callers filter with [`is_ignorable`].
///
/// An unterminated quote is not an error: the scan reaches the end of the
/// line still quoted and the remainder becomes the final token as-is.
pub fn tokenize(input: &str, delimiter: char) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut state = State::Unquoted;

    for ch in input.chars() {
        match (&state, ch) {
            (State::Unquoted, c) if c == delimiter => {
                tokens.push(std::mem::take(&mut current));
            }
            (State::Unquoted, '"' | '\'') => {
                current.push(ch);
                state = State::Quoted(ch);
            }
            (State::Quoted(open), c) if c == *open => {
                current.push(c);
                state = State::Unquoted;
            }
            (_, c) => current.push(c),
        }
    }

    tokens.push(current);
    tokens
}

/// Tokens the parser skips: empty strings and lone whitespace.
pub fn is_ignorable(token: &str) -> bool {
    matches!(token, "" | " " | "\t" | "\n")
}
