//! Command text and parameter accumulation.

use std::ops::{Deref, DerefMut};

use crate::command::Command;
use crate::parameter::CommandParameter;

const INDENT_SIZE: usize = 4;

/// A string buffer that indents every new line to the current level.
#[derive(Debug, Clone, Default)]
pub struct IndentedStringBuilder {
    buffer: String,
    indent: usize,
    at_line_start: bool,
}

impl IndentedStringBuilder {
    /// An empty buffer at indent level 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            indent: 0,
            at_line_start: true,
        }
    }

    /// Append text. Lines after embedded newlines are indented too.
    pub fn append(&mut self, text: &str) -> &mut Self {
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.buffer.push('\n');
                self.at_line_start = true;
            }
            if !line.is_empty() {
                self.write_indent();
                self.buffer.push_str(line);
            }
        }
        self
    }

    /// Append text followed by a newline.
    pub fn append_line(&mut self, text: &str) -> &mut Self {
        self.append(text);
        self.buffer.push('\n');
        self.at_line_start = true;
        self
    }

    /// Increase the indent level.
    pub fn increment_indent(&mut self) -> &mut Self {
        self.indent += 1;
        self
    }

    /// Decrease the indent level, stopping at 0.
    pub fn decrement_indent(&mut self) -> &mut Self {
        self.indent = self.indent.saturating_sub(1);
        self
    }

    /// Current indent level.
    #[must_use]
    pub fn indent_level(&self) -> usize {
        self.indent
    }

    /// Length of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The accumulated text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Reset to an empty buffer at level 0.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.indent = 0;
        self.at_line_start = true;
    }

    fn write_indent(&mut self) {
        if self.at_line_start {
            self.buffer.extend(std::iter::repeat_n(' ', self.indent * INDENT_SIZE));
            self.at_line_start = false;
        }
    }
}

/// Builds a [`Command`] from text fragments and logical parameters.
///
/// When sensitive-data logging is off, a second buffer tracks the text to
/// log: fragments appended with `redact = true` appear there as `?`.
///
/// ```rust
/// use relcore_client::CommandBuilder;
///
/// let mut builder = CommandBuilder::new(false);
/// builder.append_line("SELECT *");
/// builder.append("FROM users WHERE name = ").append_redacted("N'Alice'", true);
/// let command = builder.build();
/// assert_eq!(command.text(), "SELECT *\nFROM users WHERE name = N'Alice'");
/// assert_eq!(command.log_text(), "SELECT *\nFROM users WHERE name = ?");
/// ```
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    text: IndentedStringBuilder,
    log_text: Option<IndentedStringBuilder>,
    parameters: Vec<CommandParameter>,
}

impl CommandBuilder {
    /// Create a builder.
    #[must_use]
    pub fn new(sensitive_data_logging: bool) -> Self {
        Self {
            text: IndentedStringBuilder::new(),
            log_text: (!sensitive_data_logging).then(IndentedStringBuilder::new),
            parameters: Vec::new(),
        }
    }

    /// Append text.
    pub fn append(&mut self, text: &str) -> &mut Self {
        self.append_redacted(text, false)
    }

    /// Append text, replacing it with `?` in the log text when `redact` is set.
    pub fn append_redacted(&mut self, text: &str, redact: bool) -> &mut Self {
        self.text.append(text);
        if let Some(log) = &mut self.log_text {
            log.append(if redact { "?" } else { text });
        }
        self
    }

    /// Append text followed by a newline.
    pub fn append_line(&mut self, text: &str) -> &mut Self {
        self.text.append_line(text);
        if let Some(log) = &mut self.log_text {
            log.append_line(text);
        }
        self
    }

    /// Increase the indent level.
    pub fn increment_indent(&mut self) -> &mut Self {
        self.text.increment_indent();
        if let Some(log) = &mut self.log_text {
            log.increment_indent();
        }
        self
    }

    /// Decrease the indent level.
    pub fn decrement_indent(&mut self) -> &mut Self {
        self.text.decrement_indent();
        if let Some(log) = &mut self.log_text {
            log.decrement_indent();
        }
        self
    }

    /// Indent until the returned guard is dropped.
    pub fn indent(&mut self) -> IndentGuard<'_> {
        self.increment_indent();
        IndentGuard { builder: self }
    }

    /// Add a logical parameter.
    pub fn add_parameter(&mut self, parameter: CommandParameter) -> &mut Self {
        self.parameters.push(parameter);
        self
    }

    /// Logical parameters added so far.
    #[must_use]
    pub fn parameters(&self) -> &[CommandParameter] {
        &self.parameters
    }

    /// Length of the unredacted command text.
    #[must_use]
    pub fn command_text_length(&self) -> usize {
        self.text.len()
    }

    /// Snapshot the text and parameters into a command.
    #[must_use]
    pub fn build(&self) -> Command {
        Command::with_log_text(
            self.text.as_str(),
            self.log_text.as_ref().map(|l| l.as_str().to_string()),
            self.parameters.clone(),
        )
    }

    /// Reset to an empty builder.
    pub fn clear(&mut self) {
        self.text.clear();
        if let Some(log) = &mut self.log_text {
            log.clear();
        }
        self.parameters.clear();
    }
}

/// Restores the indent level of a [`CommandBuilder`] on drop.
#[derive(Debug)]
pub struct IndentGuard<'a> {
    builder: &'a mut CommandBuilder,
}

impl Deref for IndentGuard<'_> {
    type Target = CommandBuilder;

    fn deref(&self) -> &Self::Target {
        self.builder
    }
}

impl DerefMut for IndentGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.builder
    }
}

impl Drop for IndentGuard<'_> {
    fn drop(&mut self) {
        self.builder.decrement_indent();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use relcore_types::DbParameter;

    #[test]
    fn test_indentation() {
        let mut sb = IndentedStringBuilder::new();
        sb.append_line("BEGIN");
        sb.increment_indent();
        sb.append_line("SELECT 1;");
        sb.append("SELECT 2;\nSELECT 3;");
        sb.decrement_indent();
        sb.append_line("");
        sb.append("END");
        assert_eq!(sb.as_str(), "BEGIN\n    SELECT 1;\n    SELECT 2;\n    SELECT 3;\nEND");
    }

    #[test]
    fn test_decrement_stops_at_zero() {
        let mut sb = IndentedStringBuilder::new();
        sb.decrement_indent();
        assert_eq!(sb.indent_level(), 0);
    }

    #[test]
    fn test_guard_restores_indent() {
        let mut builder = CommandBuilder::new(true);
        builder.append_line("BEGIN");
        {
            let mut inner = builder.indent();
            inner.append_line("SELECT 1;");
        }
        builder.append("END");
        let command = builder.build();
        assert_eq!(command.text(), "BEGIN\n    SELECT 1;\nEND");
    }

    #[test]
    fn test_redaction_only_without_sensitive_logging() {
        let mut redacting = CommandBuilder::new(false);
        redacting.append("WHERE x = ").append_redacted("'secret'", true);
        assert_eq!(redacting.build().log_text(), "WHERE x = ?");

        let mut sensitive = CommandBuilder::new(true);
        sensitive.append("WHERE x = ").append_redacted("'secret'", true);
        let command = sensitive.build();
        assert_eq!(command.log_text(), "WHERE x = 'secret'");
        assert_eq!(command.log_text(), command.text());
    }

    #[test]
    fn test_length_counts_unredacted_text() {
        let mut builder = CommandBuilder::new(false);
        builder.append_redacted("'abcdef'", true);
        assert_eq!(builder.command_text_length(), 8);
    }

    #[test]
    fn test_build_snapshots_parameters_in_order() {
        let mut builder = CommandBuilder::new(false);
        builder
            .add_parameter(CommandParameter::raw("a", DbParameter::new("@a", 1)))
            .add_parameter(CommandParameter::raw("b", DbParameter::new("@b", 2)));
        let command = builder.build();
        builder.clear();

        let names: Vec<_> = command.parameters().iter().map(|p| p.invariant_name()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(builder.parameters().is_empty());
        assert_eq!(builder.command_text_length(), 0);
    }
}
