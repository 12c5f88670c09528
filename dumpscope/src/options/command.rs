//! Command descriptors: a named diagnostic capability and its option keys.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Placeholder for a decimal index inside an option key template
const INDEX_PLACEHOLDER: &str = "<idx>";

/// Named capability plus the option keys it understands, with help text.
///
/// Descriptors are built once at registration, optionally extended by the
/// modules that contribute options (`logDest`, scheduler keys, ...), and then
/// shared read-only behind an `Arc`. Two descriptors are equal when their
/// names are equal.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    name: String,
    description: String,
    options: BTreeMap<String, String>,
}

impl CommandDescriptor {
    #[must_use]
    pub fn new(name: &str, description: &str, options: &[(&str, &str)]) -> Self {
        let mut command = Self {
            name: name.to_string(),
            description: description.to_string(),
            options: BTreeMap::new(),
        };
        command.add_options(options);
        command
    }

    /// Create a descriptor that starts with all options of `parent`.
    #[must_use]
    pub fn derive(parent: &CommandDescriptor, name: &str, description: &str, options: &[(&str, &str)]) -> Self {
        let mut command = Self {
            name: name.to_string(),
            description: description.to_string(),
            options: parent.options.clone(),
        };
        command.add_options(options);
        command
    }

    pub fn add_option(&mut self, option: &str, help: &str) {
        self.options.insert(option.to_string(), help.to_string());
    }

    pub fn add_options(&mut self, options: &[(&str, &str)]) {
        for (option, help) in options {
            self.add_option(option, help);
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared option keys (templates included), sorted
    pub fn options(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    /// Returns true if `key` is declared, either literally or through an
    /// `<idx>` template.
    #[must_use]
    pub fn has_option(&self, key: &str) -> bool {
        self.options.contains_key(key)
            || self.options.keys().any(|template| matches_template(template, key))
    }

    /// Render the help text, options sorted case-insensitively.
    #[must_use]
    pub fn help_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Help for command '{}':", self.name),
            format!("Description: {}", self.description),
        ];

        let mut options: Vec<(&String, &String)> = self.options.iter().collect();
        options.sort_by_key(|(option, _)| option.to_lowercase());

        if !options.is_empty() {
            lines.push("The following options are supported:".to_string());
            lines.extend(options.into_iter().map(|(option, help)| format!("{option}: {help}")));
        }

        lines
    }
}

impl PartialEq for CommandDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for CommandDescriptor {}

impl Hash for CommandDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

fn matches_template(template: &str, key: &str) -> bool {
    let Some((prefix, suffix)) = template.split_once(INDEX_PLACEHOLDER) else {
        return false;
    };

    key.len() > prefix.len() + suffix.len()
        && key.starts_with(prefix)
        && key.ends_with(suffix)
        && key[prefix.len()..key.len() - suffix.len()].chars().all(|c| c.is_ascii_digit())
}
