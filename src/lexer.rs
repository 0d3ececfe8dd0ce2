//! Line scanning and expression tokenizing shared by the parser.
//!
//! Plain character scanning rather than a combinator or LR grammar crate:
//! the grammar is line-oriented and needs per-line error recovery, which a
//! generated parser fights rather than supports.

/// One physical source line after comment-stripping, with its 1-based line
/// number and indentation depth (a tab counts as two spaces).
#[derive(Clone, Debug, PartialEq)]
pub struct SourceLine {
    pub number: u32,
    pub indent: usize,
    pub text: String,
}

/// Splits `source` into logical lines: drops inline `{-- ... }` comments,
/// strips full-line `-- comment` lines down to nothing, strips trailing
/// `-- comment` (outside of a string literal), and records indentation.
/// Blank lines (after stripping) are kept with empty `text` so callers can
/// distinguish "blank" from "absent".
pub fn split_lines(source: &str) -> Vec<SourceLine> {
    let mut out = Vec::new();
    for (idx, raw) in source.lines().enumerate() {
        let number = (idx + 1) as u32;
        let indent = indent_of(raw);
        let without_inline_comments = strip_inline_comments(raw.trim_start_matches([' ', '\t']));
        let stripped = strip_trailing_comment(&without_inline_comments);
        out.push(SourceLine {
            number,
            indent,
            text: stripped.trim_end().to_string(),
        });
    }
    out
}

fn indent_of(line: &str) -> usize {
    let mut depth = 0;
    for ch in line.chars() {
        match ch {
            ' ' => depth += 1,
            '\t' => depth += 2,
            _ => break,
        }
    }
    depth
}

/// Drops inline `{-- ... }` comments, respecting `"..."` string literals.
/// Matches the original grammar's `inline_comment : seq<string<'{','-','-'>,
/// until<string<'}'>>>` — the span opens at `{--` and closes at the next
/// `}`, whether or not that `}` is preceded by `--`. An unterminated `{--`
/// drops the remainder of the line.
fn strip_inline_comments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_string = false;
    let mut i = 0;
    while i < line.len() {
        if !in_string && line[i..].starts_with("{--") {
            match line[i..].find('}') {
                Some(rel_end) => {
                    i += rel_end + 1;
                    continue;
                }
                None => break,
            }
        }
        let ch = line[i..].chars().next().expect("i < line.len()");
        if ch == '"' {
            in_string = !in_string;
        }
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Strips a `-- comment` suffix, respecting `"..."` string literals so a
/// `--` inside a quoted string isn't mistaken for a comment marker.
fn strip_trailing_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match bytes[i] {
            b'"' => in_string = !in_string,
            b'-' if !in_string && bytes[i + 1] == b'-' => return &line[..i],
            _ => {}
        }
        i += 1;
    }
    line
}

/// A lexical token within an expression context (rvalues, conditionals,
/// argument lists, text injections).
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Int(i32),
    Float(f32),
    Bool(bool),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Question,
    Bang,
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    Arrow,
    Underscore,
    And,
    Or,
}

/// Tokenizes an expression fragment (everything after a `~`, `(?`, `:`,
/// `{`, or similar introducer has been stripped by the caller).
pub fn tokenize_expr(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '?' => {
                tokens.push(Token::Question);
                i += 1;
            }
            '"' => {
                let (s, next) = scan_string(&chars, i)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    tokens.push(Token::Eq);
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '-' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Token::Arrow);
                i += 2;
            }
            '_' if !chars.get(i + 1).is_some_and(|c| c.is_alphanumeric() || *c == '_') => {
                tokens.push(Token::Underscore);
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let (tok, next) = scan_number(&chars, i)?;
                tokens.push(tok);
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let (word, next) = scan_word(&chars, i);
                i = next;
                tokens.push(match word.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "and" => Token::And,
                    "or" => Token::Or,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

fn scan_word(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

fn scan_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let mut s = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((s, i + 1)),
            '\\' if i + 1 < chars.len() => {
                s.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c => {
                s.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated string literal".to_string())
}

fn scan_number(chars: &[char], start: usize) -> Result<(Token, usize), String> {
    let mut end = start;
    if chars[end] == '-' {
        end += 1;
    }
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    let mut is_float = false;
    if chars.get(end) == Some(&'.') && chars.get(end + 1).is_some_and(char::is_ascii_digit) {
        is_float = true;
        end += 1;
        while end < chars.len() && chars[end].is_ascii_digit() {
            end += 1;
        }
    }
    let text: String = chars[start..end].iter().collect();
    if is_float {
        text.parse::<f32>()
            .map(|f| (Token::Float(f), end))
            .map_err(|e| e.to_string())
    } else {
        text.parse::<i32>()
            .map(|n| (Token::Int(n), end))
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_comment_outside_strings() {
        let lines = split_lines("Hello -- a note\n\"has -- inside\" -- real comment");
        assert_eq!(lines[0].text, "Hello");
        assert_eq!(lines[1].text, "\"has -- inside\"");
    }

    #[test]
    fn drops_inline_comment_without_corrupting_the_rest_of_the_line() {
        let lines = split_lines("Hello {-- note --} world\n{name} is {-- aside } fine");
        assert_eq!(lines[0].text, "Hello  world");
        assert_eq!(lines[1].text, "{name} is  fine");
    }

    #[test]
    fn inline_comment_closes_at_first_brace_not_at_double_dash() {
        // Matches the original grammar: closes at the next `}`, not `--}`.
        let lines = split_lines("Hi {-- note } there");
        assert_eq!(lines[0].text, "Hi  there");
    }

    #[test]
    fn unterminated_inline_comment_drops_rest_of_line() {
        let lines = split_lines("Hello {-- never closes");
        assert_eq!(lines[0].text, "Hello");
    }

    #[test]
    fn indentation_counts_tabs_as_two() {
        let lines = split_lines("\t~ x = 1\n  ~ y = 2");
        assert_eq!(lines[0].indent, 2);
        assert_eq!(lines[1].indent, 2);
    }

    #[test]
    fn tokenizes_comparison_and_call() {
        let tokens = tokenize_expr("gold >= 10").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Ident("gold".into()), Token::Ge, Token::Int(10)]
        );

        let tokens = tokenize_expr("is_admin()").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Ident("is_admin".into()), Token::LParen, Token::RParen]
        );
    }

    #[test]
    fn tokenizes_negative_int_and_float() {
        let tokens = tokenize_expr("-3 2.5").unwrap();
        assert_eq!(tokens, vec![Token::Int(-3), Token::Float(2.5)]);
    }
}
