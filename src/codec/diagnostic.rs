use thiserror::Error;

use super::input::Mark;

/// Terminal parse failure with the position it occurred at.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message} at {mark}")]
pub struct Diagnostic {
    pub message: String,
    pub mark: Mark,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, mark: Mark) -> Self {
        Self { message: message.into(), mark }
    }

    /// `expected X, but found Y` at `mark`.
    pub fn expected(expected: &str, found: Option<char>, mark: Mark) -> Self {
        let message = match found {
            Some(c) => format!("expected {}, but found {:?}", expected, c),
            None => format!("expected {}, but found end of input", expected),
        };
        Self::new(message, mark)
    }

    pub fn unexpected(found: Option<char>, mark: Mark) -> Self {
        let message = match found {
            Some(c) => format!("unexpected {:?}", c),
            None => "unexpected end of input".to_string(),
        };
        Self::new(message, mark)
    }

    /// Renders the offending line of `source` with a caret under the column.
    pub fn render(&self, source: &str) -> String {
        let line = source.lines().nth(self.mark.line.saturating_sub(1)).unwrap_or("");
        let gutter = self.mark.line.to_string();
        let pad = " ".repeat(gutter.len());
        format!(
            "error: {}\n{} --> {}\n{} |\n{} | {}\n{} | {}^",
            self.message,
            pad,
            self.mark,
            pad,
            gutter,
            line,
            pad,
            " ".repeat(self.mark.column.saturating_sub(1)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_points_at_column() {
        let diagnostic = Diagnostic::new("bad", Mark::new(7, 2, 3));
        let rendered = diagnostic.render("first\nab?cd");
        assert!(rendered.contains("2 | ab?cd"));
        assert!(rendered.ends_with("  |   ^"));
        assert_eq!(diagnostic.to_string(), "bad at 2:3");
    }
}
