//! Environment merging and POSIX-style `${VAR}` template expansion

use indexmap::IndexMap;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Ordered environment mapping. Insertion order is preserved so that
/// profile-script output and process environments stay deterministic.
pub type EnvMap = IndexMap<String, String>;

/// Regex for POSIX-style variable references: ${VAR} or $VAR
static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

/// Merge `overlay` into `base`: the result carries the union of both key
/// sets and overlay values win for keys present in both.
pub fn merge_env(base: &EnvMap, overlay: &EnvMap) -> EnvMap {
    let mut merged = base.clone();
    for (k, v) in overlay {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Apply `overrides` on top of `base`. Override values may themselves be
/// templates referencing `base`; an unresolved reference fails.
pub fn override_env(base: &EnvMap, overrides: &EnvMap) -> Result<EnvMap, TemplateError> {
    let expanded = templating_env(base, overrides)?;
    Ok(merge_env(base, &expanded))
}

/// Expand every value in `templates` against `context` and return only the
/// expanded map. The caller decides whether and how to merge it back.
pub fn templating_env(context: &EnvMap, templates: &EnvMap) -> Result<EnvMap, TemplateError> {
    let mut expanded = EnvMap::new();
    for (k, v) in templates {
        expanded.insert(k.clone(), substitute(context, v)?);
    }
    Ok(expanded)
}

/// Substitute all `${VAR}` / `$VAR` references in `input` against `context`.
pub fn substitute(context: &EnvMap, input: &str) -> Result<String, TemplateError> {
    let mut error: Option<TemplateError> = None;

    let result = VAR_PATTERN.replace_all(input, |caps: &Captures| {
        if error.is_some() {
            return String::new();
        }
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        match context.get(name) {
            Some(value) => value.clone(),
            None => {
                error = Some(TemplateError::UnresolvedVariable(name.to_string()));
                String::new()
            }
        }
    });

    if let Some(e) = error {
        return Err(e);
    }

    // A leftover "${" means a reference the pattern could not parse,
    // e.g. "${}" or an unterminated brace.
    if result.contains("${") {
        return Err(TemplateError::InvalidReference(input.to_string()));
    }

    Ok(result.into_owned())
}

/// Quote a value for use in a shell `export` statement.
///
/// Values made only of safe characters pass through unchanged; everything
/// else is single-quoted with embedded quotes escaped as `'\''`.
pub fn shell_quote(value: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "_-./:=+%,@".contains(c);
    if !value.is_empty() && value.chars().all(safe) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Snapshot of the OS environment as an [`EnvMap`].
pub fn os_env() -> EnvMap {
    std::env::vars().collect()
}

/// Errors that can occur during template expansion
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unresolved variable reference: {0}")]
    UnresolvedVariable(String),

    #[error("invalid variable reference in: {0}")]
    InvalidReference(String),
}
