//! Positioned diagnostics and their aggregation.
//!
//! Analysis reports into an [`ErrorCollector`] and keeps going; the
//! pipeline fails only at the very end, with an [`AnalyzeError`] that lists
//! every diagnostic in the order it was collected (which is source order,
//! since declarations are processed in source order).

use core::fmt;
use minz_ast::Pos;

/// One positioned diagnostic.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Diagnostic {
    /// Human-readable message.
    pub message: String,
    /// Source position of the offending construct.
    pub pos: Pos,
    /// Optional context, e.g. the enclosing function.
    pub context: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "{}: {} (in {ctx})", self.pos, self.message),
            None => write!(f, "{}: {}", self.pos, self.message),
        }
    }
}

/// The aggregate error returned when analysis collected any diagnostics.
#[derive(Debug, PartialEq, Eq)]
pub struct AnalyzeError {
    /// Source file the diagnostics refer to.
    pub file: String,
    /// Every diagnostic, in collection order.
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for AnalyzeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "analysis of {} failed with {} error(s):",
            self.file,
            self.diagnostics.len()
        )?;
        for d in &self.diagnostics {
            writeln!(f, "{}:{d}", self.file)?;
        }
        Ok(())
    }
}

impl std::error::Error for AnalyzeError {}

/// Accumulates diagnostics for one compilation.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    file: String,
    diagnostics: Vec<Diagnostic>,
}

impl ErrorCollector {
    /// Create a collector for the given source file.
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            diagnostics: Vec::new(),
        }
    }

    /// The source file diagnostics refer to.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Report a diagnostic.
    pub fn report(&mut self, pos: Pos, message: impl Into<String>) {
        let message = message.into();
        log::debug!("diagnostic at {pos}: {message}");
        self.diagnostics.push(Diagnostic {
            message,
            pos,
            context: None,
        });
    }

    /// Report a diagnostic with a context string.
    pub fn report_in(&mut self, pos: Pos, message: impl Into<String>, context: impl Into<String>) {
        let message = message.into();
        log::debug!("diagnostic at {pos}: {message}");
        self.diagnostics.push(Diagnostic {
            message,
            pos,
            context: Some(context.into()),
        });
    }

    /// Report an undefined-name diagnostic, attaching a did-you-mean hint
    /// when a close enough candidate is in scope.
    pub fn undefined<'a>(
        &mut self,
        pos: Pos,
        what: &str,
        name: &str,
        candidates: impl IntoIterator<Item = &'a str>,
    ) {
        match closest_match(name, candidates) {
            Some(best) => self.report(
                pos,
                format!("undefined {what} `{name}`; did you mean `{best}`?"),
            ),
            None => self.report(pos, format!("undefined {what} `{name}`")),
        }
    }

    /// Number of diagnostics collected so far.
    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// True when nothing has been reported.
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// The diagnostics collected so far, in order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Finish: `Ok(())` when clean, the aggregate error otherwise.
    pub fn finish(self) -> Result<(), AnalyzeError> {
        if self.diagnostics.is_empty() {
            Ok(())
        } else {
            Err(AnalyzeError {
                file: self.file,
                diagnostics: self.diagnostics,
            })
        }
    }
}

/// Find the candidate closest to `name` by edit distance, if any is close
/// enough to be a plausible typo (distance at most 2, and less than the
/// name's own length).
pub fn closest_match<'a>(
    name: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    let mut best: Option<(&str, usize)> = None;
    for cand in candidates {
        let d = edit_distance(name, cand);
        if d <= 2 && d < name.len() && best.is_none_or(|(_, bd)| d < bd) {
            best = Some((cand, d));
        }
    }
    best.map(|(c, _)| c)
}

/// Levenshtein distance over bytes; identifiers are ASCII in practice.
fn edit_distance(a: &str, b: &str) -> usize {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut prev = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            let next = (prev + cost).min(row[j] + 1).min(row[j + 1] + 1);
            prev = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distances() {
        assert_eq!(edit_distance("score", "score"), 0);
        assert_eq!(edit_distance("scor", "score"), 1);
        assert_eq!(edit_distance("scroe", "score"), 2);
        assert_eq!(edit_distance("x", "screen"), 6);
    }

    #[test]
    fn suggestions() {
        let names = ["score", "screen", "sprite"];
        assert_eq!(closest_match("scor", names), Some("score"));
        assert_eq!(closest_match("spride", names), Some("sprite"));
        assert_eq!(closest_match("qqq", names), None);
        // A 1-char name must not "match" everything.
        assert_eq!(closest_match("z", ["ab", "cd"]), None);
    }

    #[test]
    fn aggregate_error_lists_in_order() {
        let mut errors = ErrorCollector::new("game.minz");
        errors.report(Pos::new(1, 5, 4), "first");
        errors.report(Pos::new(9, 1, 90), "second");
        let err = errors.finish().unwrap_err();
        let text = err.to_string();
        let first = text.find("first").unwrap();
        let second = text.find("second").unwrap();
        assert!(first < second);
        assert!(text.contains("game.minz:1:5: first"));
    }
}
