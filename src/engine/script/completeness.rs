/// Whether `code` can be parsed as it stands. Unterminated strings, open
/// brackets, a trailing pipe and a trailing line continuation all mean the
/// user is still typing.
pub fn is_complete(code: &str) -> bool {
    let mut brackets: Vec<char> = Vec::new();
    let mut last_significant: Option<char> = None;
    let mut chars = code.chars().peekable();
    let mut previous: Option<char> = None;

    while let Some(c) = chars.next() {
        match c {
            // inside a word (`a#b`) it is an ordinary character
            '#' if starts_token(previous) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                previous = Some('\n');
                continue;
            }
            '`' => match chars.next() {
                None => return false,
                Some('\n') => {
                    last_significant = Some('`');
                    previous = Some('\n');
                    continue;
                }
                Some('\r') if chars.peek() == Some(&'\n') => {
                    chars.next();
                    last_significant = Some('`');
                    previous = Some('\n');
                    continue;
                }
                Some(escaped) => last_significant = Some(escaped),
            },
            '\'' => {
                loop {
                    match chars.next() {
                        None => return false,
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                        }
                        Some('\'') => break,
                        Some(_) => {}
                    }
                }
                last_significant = Some('\'');
            }
            '"' => {
                loop {
                    match chars.next() {
                        None => return false,
                        Some('`') => {
                            if chars.next().is_none() {
                                return false;
                            }
                        }
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                        }
                        Some('"') => break,
                        Some(_) => {}
                    }
                }
                last_significant = Some('"');
            }
            '(' | '{' | '[' => {
                brackets.push(c);
                last_significant = Some(c);
            }
            ')' | '}' | ']' => {
                // mismatches are reported by the parser
                brackets.pop();
                last_significant = Some(c);
            }
            c if c.is_whitespace() => {}
            c => last_significant = Some(c),
        }
        previous = Some(c);
    }

    brackets.is_empty() && !matches!(last_significant, Some('|') | Some('`'))
}

fn starts_token(previous: Option<char>) -> bool {
    previous.map_or(true, |c| c.is_whitespace() || matches!(c, ';' | '|' | '(' | '{'))
}
