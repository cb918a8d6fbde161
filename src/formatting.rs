//! # Formatting
//!
//! A [`FormattedValue`] pairs a MIME type with a rendered string. Values headed
//! for display go through a [`ValueRenderer`], which may render one value to
//! several MIME types at once; the pipeline keeps whatever order it returns.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::value::Value;

pub const PLAIN_TEXT: &str = "text/plain";
pub const HTML: &str = "text/html";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormattedValue {
    pub mime_type: String,
    pub value: String,
}

impl FormattedValue {
    pub fn new(mime_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            value: value.into(),
        }
    }

    pub fn plain(value: impl Into<String>) -> Self {
        Self::new(PLAIN_TEXT, value)
    }

    pub fn html(value: impl Into<String>) -> Self {
        Self::new(HTML, value)
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait ValueRenderer: Send + Sync {
    fn render(&self, value: &Value) -> Vec<FormattedValue>;
}

/// Renders collections as an HTML table followed by plain text; everything
/// else as plain text only.
#[derive(Debug, Default, Clone)]
pub struct DefaultRenderer;

impl ValueRenderer for DefaultRenderer {
    fn render(&self, value: &Value) -> Vec<FormattedValue> {
        match value {
            Value::Map(map) => vec![
                FormattedValue::html(html_table(
                    "key",
                    map.iter().map(|(key, value)| (key.clone(), value)),
                )),
                FormattedValue::plain(value.to_string()),
            ],
            Value::List(items) => vec![
                FormattedValue::html(html_table(
                    "index",
                    items.iter().enumerate().map(|(i, item)| (i.to_string(), item)),
                )),
                FormattedValue::plain(value.to_string()),
            ],
            _ => vec![FormattedValue::plain(value.to_string())],
        }
    }
}

fn html_table<'a>(key_header: &str, rows: impl Iterator<Item = (String, &'a Value)>) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<table><thead><tr><th><i>{}</i></th><th>value</th></tr></thead><tbody>",
        key_header
    );
    for (key, value) in rows {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(&key),
            escape_html(&value.to_string())
        );
    }
    html.push_str("</tbody></table>");
    html
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_string_renders_verbatim() {
        let rendered = DefaultRenderer.render(&Value::from("line\n"));
        assert_eq!(rendered, vec![FormattedValue::plain("line\n")]);
    }

    #[test]
    fn test_empty_string_is_not_suppressed() {
        let rendered = DefaultRenderer.render(&Value::from(""));
        assert_eq!(rendered, vec![FormattedValue::plain("")]);
    }

    #[test]
    fn test_map_renders_html_table_first() {
        let mut map = BTreeMap::new();
        map.insert("prop1".to_string(), Value::from("value1"));
        map.insert("prop2".to_string(), Value::from("value2"));
        let rendered = DefaultRenderer.render(&Value::Map(map));

        assert_eq!(rendered.len(), 2);
        assert_eq!(
            rendered[0],
            FormattedValue::html(
                "<table><thead><tr><th><i>key</i></th><th>value</th></tr></thead><tbody>\
                 <tr><td>prop1</td><td>value1</td></tr>\
                 <tr><td>prop2</td><td>value2</td></tr></tbody></table>"
            )
        );
        assert_eq!(rendered[1].mime_type, PLAIN_TEXT);
    }

    #[test]
    fn test_html_is_escaped() {
        let rendered = DefaultRenderer.render(&Value::List(vec![Value::from("<b>")]));
        assert!(rendered[0].value.contains("<td>&lt;b&gt;</td>"));
    }
}
