use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A run of suggestion text. Styling is left to the renderer.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Segment {
    Plain(String),
    Code(String),
    Emphasis(String),
}

impl Segment {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Plain(text) | Self::Code(text) | Self::Emphasis(text) => text,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct Suggestion {
    segments: Vec<Segment>,
}

impl Suggestion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn plain(mut self, text: impl Into<String>) -> Self {
        self.segments.push(Segment::Plain(text.into()));
        self
    }

    #[must_use]
    pub fn code(mut self, text: impl Into<String>) -> Self {
        self.segments.push(Segment::Code(text.into()));
        self
    }

    #[must_use]
    pub fn emphasis(mut self, text: impl Into<String>) -> Self {
        self.segments.push(Segment::Emphasis(text.into()));
        self
    }

    /// Appends `items` rendered by `render`, separated by `", "`.
    #[must_use]
    pub fn list<T>(mut self, items: &[T], mut render: impl FnMut(Self, &T) -> Self) -> Self {
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                self = self.plain(", ");
            }
            self = render(self, item);
        }
        self
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Terminal rendering: code in backticks, emphasis in asterisks.
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Plain(text) => out.push_str(text),
                Segment::Code(text) => {
                    out.push('`');
                    out.push_str(text);
                    out.push('`');
                }
                Segment::Emphasis(text) => {
                    out.push('*');
                    out.push_str(text);
                    out.push('*');
                }
            }
        }
        out
    }
}

impl Display for Suggestion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render_plain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_inserts_separators_between_items() {
        let suggestion = Suggestion::new()
            .plain("events: ")
            .list(&["a", "b"], |acc, item| acc.code(*item));

        assert_eq!(suggestion.render_plain(), "events: `a`, `b`");
        assert_eq!(suggestion.segments().len(), 4);
    }

    #[test]
    fn segments_serialize_with_kind_and_text() {
        let suggestion = Suggestion::new().emphasis("Timing:");
        let value = match serde_json::to_value(&suggestion) {
            Ok(value) => value,
            Err(err) => panic!("failed to serialize suggestion: {err}"),
        };
        assert_eq!(value, serde_json::json!([{"kind": "emphasis", "text": "Timing:"}]));
    }
}
