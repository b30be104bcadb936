//! `${name}` placeholder substitution for SQL templates.
//!
//! # Security
//!
//! Substitution is purely textual. Values are spliced into the SQL verbatim:
//! nothing is quoted or escaped, and the result is sent to the database as-is.
//! A value such as `1; DROP TABLE users` ends up in the statement unchanged.
//! This is an operator tool; whoever supplies the parameters is trusted with
//! the connection, and callers that accept parameters from untrusted sources
//! are responsible for validating them first.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Matches `${identifier}` where identifier is word characters and dots.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_.]+)\}").expect("placeholder pattern is valid")
});

/// Replaces every `${key}` in `template` whose key is present in `vars`.
///
/// Placeholders without a matching key are left untouched, so a typo surfaces
/// later as a database error rather than here. See the module docs: values
/// are **not** escaped.
pub fn compile(template: &str, vars: &HashMap<String, String>) -> String {
    if vars.is_empty() {
        return template.to_string();
    }

    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Returns the distinct placeholder names in `template`, in order of first
/// appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}
