//! Environment variable templating for configuration files.
//!
//! Configuration files may reference the environment so secrets never need
//! to be written to disk:
//!
//! ```text
//! client_secret: "${O365_CLIENT_SECRET}",
//! port: ${ZABBIX_PORT:10051},
//! ```
//!
//! A reference without a default must resolve, otherwise loading fails.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;

/// `${` up to the next `}`. The brace is optional so an unclosed reference
/// still matches and can be reported.
#[allow(clippy::expect_used, reason = "The pattern is a literal")]
static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)(\})?").expect("reference pattern is valid"));

/// Replace every `${NAME}` and `${NAME:default}` in `content` with the value
/// returned by `lookup`.
///
/// Everything after the first `:` is the default, so defaults may themselves
/// contain colons (`${ENDPOINT:http://localhost:4318}`).
///
/// # Errors
///
/// Returns [`ConfigError::MissingVariable`] when a reference has no default
/// and `lookup` yields nothing, and [`ConfigError::UnterminatedVariable`] when
/// a `${` is never closed.
pub fn substitute<F>(content: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(content.len());
    let mut last = 0;

    for captures in REFERENCE.captures_iter(content) {
        let Some(reference) = captures.get(0) else {
            continue;
        };
        if captures.get(2).is_none() {
            return Err(ConfigError::UnterminatedVariable(reference.start()));
        }

        let expression = captures.get(1).map_or("", |m| m.as_str());
        let (name, default) = match expression.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (expression, None),
        };

        output.push_str(&content[last..reference.start()]);
        match (lookup(name), default) {
            (Some(value), _) => output.push_str(&value),
            (None, Some(default)) => output.push_str(default),
            (None, None) => return Err(ConfigError::MissingVariable(name.to_string())),
        }
        last = reference.end();
    }

    output.push_str(&content[last..]);
    Ok(output)
}

/// [`substitute`] against the process environment.
///
/// # Errors
///
/// See [`substitute`].
pub fn substitute_env(content: &str) -> Result<String, ConfigError> {
    substitute(content, |name| std::env::var(name).ok())
}
