use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: i64,
    pub command_line: String,
}

impl HistoryEntry {
    pub fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            ("Id".to_string(), Value::Integer(self.id)),
            (
                "CommandLine".to_string(),
                Value::String(self.command_line.clone()),
            ),
        ]))
    }
}

/// Engine-side state that outlives a single submission.
#[derive(Debug, Default)]
pub struct Session {
    variables: HashMap<String, Value>,
    history: VecDeque<HistoryEntry>,
    last_history_id: i64,
    /// First and last token of the previous user submission.
    tokens: Option<(String, String)>,
}

impl Session {
    /// Unset variables read as null. `env:NAME` reads the process
    /// environment.
    pub fn variable(&self, name: &str) -> Value {
        if let Some(key) = name
            .get(..4)
            .filter(|prefix| prefix.eq_ignore_ascii_case("env:"))
            .map(|_| &name[4..])
        {
            return std::env::var(key).map(Value::String).unwrap_or_default();
        }
        self.variables.get(name).cloned().unwrap_or_default()
    }

    pub fn try_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn variables(&self) -> Vec<(&String, &Value)> {
        let mut variables: Vec<_> = self.variables.iter().collect();
        variables.sort_by(|a, b| a.0.cmp(b.0));
        variables
    }

    pub fn last_token(&self) -> Value {
        self.tokens
            .as_ref()
            .map(|(_, last)| Value::String(last.clone()))
            .unwrap_or_default()
    }

    pub fn first_token(&self) -> Value {
        self.tokens
            .as_ref()
            .map(|(first, _)| Value::String(first.clone()))
            .unwrap_or_default()
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Records a finished user submission in history and remembers its
    /// tokens for `$$` and `$^`.
    pub fn record_submission(&mut self, code: &str, history_size: usize) {
        let tokens = tokenize(code);
        if let (Some(first), Some(last)) = (tokens.first(), tokens.last()) {
            self.tokens = Some((first.clone(), last.clone()));
        }

        let command_line = code.trim();
        if command_line.is_empty() || history_size == 0 {
            return;
        }
        self.last_history_id += 1;
        self.history.push_back(HistoryEntry {
            id: self.last_history_id,
            command_line: command_line.to_string(),
        });
        while self.history.len() > history_size {
            self.history.pop_front();
        }
    }
}

/// Splits a submission into whitespace and `;` separated tokens, keeping
/// quoted text together with its quotes and dropping comments.
pub fn tokenize(code: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = code.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    current.push(c);
                    quote = Some(c);
                }
                '#' if current.is_empty() => {
                    for skipped in chars.by_ref() {
                        if skipped == '\n' {
                            break;
                        }
                    }
                }
                c if c.is_whitespace() || c == ';' => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("echo /this/is/a/path"), vec!["echo", "/this/is/a/path"]);
        assert_eq!(tokenize("$$; $^"), vec!["$$", "$^"]);
        assert_eq!(tokenize("echo 'a b' # note"), vec!["echo", "'a b'"]);
        assert!(tokenize("  ").is_empty());
    }

    #[test]
    fn test_record_submission() {
        let mut session = Session::default();
        session.record_submission("echo /this/is/a/path", 10);
        assert_eq!(session.first_token(), Value::from("echo"));
        assert_eq!(session.last_token(), Value::from("/this/is/a/path"));

        session.record_submission("   ", 10);
        assert_eq!(session.history().count(), 1);
        assert_eq!(session.last_token(), Value::from("/this/is/a/path"));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut session = Session::default();
        for i in 0..5 {
            session.record_submission(&format!("echo {}", i), 3);
        }
        let ids: Vec<i64> = session.history().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn test_env_variables() {
        let session = Session::default();
        assert_eq!(session.variable("env:NO_SUCH_VARIABLE_XYZ"), Value::Null);
        assert_eq!(session.variable("unset"), Value::Null);
    }
}
