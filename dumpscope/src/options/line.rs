//! Option lines: `key=value,flag,other=a\,b`
//!
//! ## Grammar
//!
//! - Segments are separated by `,` not preceded by `\`
//! - Key and value are separated by the first `=` not preceded by `\`
//! - `\x` reads as `x` in both key and value; a trailing lone `\` is literal
//! - Empty segments and empty keys are dropped; a key without `=` is a flag
//!
//! ## Accessors
//!
//! Every typed accessor has a strict `try_*` form returning the parse error and
//! a lenient `get_*` form. The lenient forms report bad values on stderr and
//! fall back to the caller's default, except [`OptionsLine::get_int`], which
//! treats a bad integer as fatal and ends the process.

use log::debug;
use regex::Regex;
use std::sync::Arc;

use super::units::{parse_magnitude, DURATION_UNITS, SIZE_UNITS};
use super::CommandDescriptor;
use crate::domain::OptionError;

/// Parsed option line, optionally bound to the command it configures.
#[derive(Debug, Clone, Default)]
pub struct OptionsLine {
    /// Keys in first-seen order; a repeated key keeps its position and takes
    /// the later value.
    pairs: Vec<(String, Option<String>)>,
    command: Option<Arc<CommandDescriptor>>,
}

impl OptionsLine {
    /// Parse a line that is not bound to any command.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut pairs: Vec<(String, Option<String>)> = Vec::new();

        for segment in split_unescaped(line, ',', usize::MAX) {
            if segment.is_empty() {
                continue;
            }

            let mut parts = split_unescaped(segment, '=', 2).into_iter();
            let raw_key = parts.next().unwrap_or_default();
            if raw_key.is_empty() {
                continue;
            }

            let key = dequote(raw_key);
            let value = parts.next().map(dequote);

            match pairs.iter_mut().find(|(existing, _)| *existing == key) {
                Some(pair) => pair.1 = value,
                None => pairs.push((key, value)),
            }
        }

        Self { pairs, command: None }
    }

    /// Parse a line configuring `command`.
    #[must_use]
    pub fn for_command(line: &str, command: Arc<CommandDescriptor>) -> Self {
        let mut options = Self::parse(line);
        options.command = Some(command);
        options
    }

    #[must_use]
    pub fn command(&self) -> Option<&CommandDescriptor> {
        self.command.as_deref()
    }

    fn command_name(&self) -> &str {
        self.command.as_deref().map_or("<none>", CommandDescriptor::name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(key, _)| key.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[must_use]
    pub fn has_option(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    #[must_use]
    pub fn has_help_option(&self) -> bool {
        self.has_option("help")
    }

    /// Raw value: `None` if absent, `Some(None)` for a flag.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<Option<&str>> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_deref())
    }

    /// String value, or `default` if the key is absent. A flag yields `None`.
    #[must_use]
    pub fn get_string<'a>(&'a self, key: &str, default: Option<&'a str>) -> Option<&'a str> {
        match self.value(key) {
            Some(value) => value,
            None => default,
        }
    }

    /// Boolean value: a bare flag or a case-insensitive `true` is true.
    #[must_use]
    pub fn get_boolean(&self, key: &str, default: bool) -> bool {
        match self.value(key) {
            Some(None) => true,
            Some(Some(value)) => value.eq_ignore_ascii_case("true"),
            None => default,
        }
    }

    /// # Errors
    /// Returns an error if the value is missing or not a valid `i32`.
    pub fn try_int(&self, key: &str) -> Result<Option<i32>, OptionError> {
        self.try_parse(key, |value| {
            value.parse::<i32>().map_err(|_| OptionError::InvalidInteger { value: value.to_string() })
        })
    }

    /// Integer value; an unparsable value terminates the process.
    #[must_use]
    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.try_int(key) {
            Ok(value) => value.unwrap_or(default),
            Err(err) => {
                self.report_option_error(key, &err);
                std::process::exit(1);
            }
        }
    }

    /// # Errors
    /// Returns an error if the value is missing or not a valid `i64`.
    pub fn try_long(&self, key: &str) -> Result<Option<i64>, OptionError> {
        self.try_parse(key, |value| {
            value.parse::<i64>().map_err(|_| OptionError::InvalidInteger { value: value.to_string() })
        })
    }

    #[must_use]
    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        self.lenient(key, default, self.try_long(key))
    }

    /// # Errors
    /// Returns an error if the value is missing or not a valid number.
    pub fn try_double(&self, key: &str) -> Result<Option<f64>, OptionError> {
        self.try_parse(key, |value| {
            value.parse::<f64>().map_err(|_| OptionError::InvalidNumber { value: value.to_string() })
        })
    }

    #[must_use]
    pub fn get_double(&self, key: &str, default: f64) -> f64 {
        self.lenient(key, default, self.try_double(key))
    }

    /// Byte size with optional `k`, `M`, `G` suffixes.
    ///
    /// # Errors
    /// Returns an error for a missing value, an unknown unit or overflow.
    pub fn try_size(&self, key: &str) -> Result<Option<i64>, OptionError> {
        self.try_parse(key, |value| parse_magnitude(value, SIZE_UNITS))
    }

    #[must_use]
    pub fn get_size(&self, key: &str, default: i64) -> i64 {
        self.lenient(key, default, self.try_size(key))
    }

    /// Duration in seconds with optional `s`, `m`, `h`, `d` suffixes.
    ///
    /// # Errors
    /// Returns an error for a missing value, an unknown unit or overflow.
    pub fn try_duration_secs(&self, key: &str) -> Result<Option<i64>, OptionError> {
        self.try_parse(key, |value| parse_magnitude(value, DURATION_UNITS))
    }

    #[must_use]
    pub fn get_duration_secs(&self, key: &str, default: i64) -> i64 {
        self.lenient(key, default, self.try_duration_secs(key))
    }

    /// Regular expression matched anywhere in the subject.
    ///
    /// # Errors
    /// Returns an error for a missing value or an invalid expression.
    pub fn try_pattern(&self, key: &str) -> Result<Option<Regex>, OptionError> {
        self.try_parse(key, |value| {
            Regex::new(value).map_err(|e| OptionError::InvalidPattern {
                pattern: value.to_string(),
                reason: e.to_string(),
            })
        })
    }

    #[must_use]
    pub fn get_pattern(&self, key: &str, default: Option<Regex>) -> Option<Regex> {
        match self.try_pattern(key) {
            Ok(Some(pattern)) => Some(pattern),
            Ok(None) => default,
            Err(err) => {
                self.report_option_error(key, &err);
                default
            }
        }
    }

    /// First key (in line order) the bound command does not declare.
    ///
    /// Always `None` for a line without a command.
    #[must_use]
    pub fn get_unknown_argument(&self) -> Option<&str> {
        let command = self.command.as_deref()?;
        self.keys().find(|key| !command.has_option(key))
    }

    fn try_parse<T>(
        &self,
        key: &str,
        parse: impl FnOnce(&str) -> Result<T, OptionError>,
    ) -> Result<Option<T>, OptionError> {
        match self.value(key) {
            None => Ok(None),
            Some(None) => Err(OptionError::MissingValue),
            Some(Some(value)) => parse(value).map(Some),
        }
    }

    fn lenient<T>(&self, key: &str, default: T, parsed: Result<Option<T>, OptionError>) -> T {
        match parsed {
            Ok(value) => value.unwrap_or(default),
            Err(err) => {
                self.report_option_error(key, &err);
                default
            }
        }
    }

    /// Diagnostic lines for a malformed value of `key`.
    #[must_use]
    pub fn describe_option_error(&self, key: &str, err: &OptionError) -> [String; 2] {
        let value = self.value(key).flatten().unwrap_or("<empty>");
        [format!("Error in option {key}={value} for command '{}'", self.command_name()), err.to_string()]
    }

    fn report_option_error(&self, key: &str, err: &OptionError) {
        for line in self.describe_option_error(key, err) {
            eprintln!("{line}");
        }
        debug!("option error: key={key} command={} error={err:?}", self.command_name());
    }
}

/// Split on `separator` when not preceded by a backslash, producing at most
/// `limit` pieces.
#[must_use]
pub fn split_unescaped(text: &str, separator: char, limit: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut previous: Option<char> = None;

    for (pos, c) in text.char_indices() {
        if pieces.len() + 1 >= limit {
            break;
        }
        if c == separator && previous != Some('\\') {
            pieces.push(&text[start..pos]);
            start = pos + c.len_utf8();
        }
        previous = Some(c);
    }

    pieces.push(&text[start..]);
    pieces
}

fn dequote(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            // A trailing backslash stays a backslash
            result.push(chars.next().unwrap_or('\\'));
        } else {
            result.push(c);
        }
    }

    result
}
