//! Environment variable substitution.
//!
//! Substitution runs on the raw document text before it is parsed, so a
//! replacement can change how a value is typed (`enabled: ${FLAG}` becomes a
//! boolean when `FLAG=true`).
//!
//! Supported forms:
//!
//! | text                  | result                                        |
//! |-----------------------|-----------------------------------------------|
//! | `${NAME}`             | value of `NAME`, empty when unset             |
//! | `${env:NAME}`         | same as `${NAME}`                             |
//! | `${NAME:-fallback}`   | `fallback` when `NAME` is unset or empty      |
//! | `$${NAME}`            | the literal text `${NAME}`                    |
//! | `$$`                  | a literal `$`                                 |
//!
//! A `${...}` whose body does not start with a variable name (`${1ABC}`,
//! `${}`) is not a reference and is kept as written.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::{DecodeError, DecodeResult};

const DEFAULT_SEPARATOR: &str = ":-";

fn escaped_dollar() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\$([^{$])").expect("valid regex"))
}

fn reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\$+)\{([a-zA-Z_][a-zA-Z0-9_]*-?[^}]*)\}").expect("valid regex"))
}

fn variable_name() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid regex"))
}

/// Substitutes references using the process environment.
pub fn substitute(input: &str) -> DecodeResult<String> {
    substitute_with(input, &|name| std::env::var(name).ok())
}

/// Substitutes references using `lookup` to resolve variable names.
pub fn substitute_with(
    input: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> DecodeResult<String> {
    let unescaped = escaped_dollar().replace_all(input, |caps: &Captures<'_>| format!("${}", &caps[1]));

    let mut out = String::with_capacity(unescaped.len());
    let mut last = 0;
    for caps in reference().captures_iter(&unescaped) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        out.push_str(&unescaped[last..whole.start]);
        last = whole.end;

        let dollars = caps[1].len();
        let body = &caps[2];
        let kept = "$".repeat(dollars / 2);
        out.push_str(&kept);

        if dollars % 2 == 1 {
            out.push_str(&resolve(body, lookup)?);
        } else {
            // An escaped reference keeps its text, but a fallback may still
            // hold a live reference: `$${A:-${B}}` becomes `${A:-<B>}`.
            out.push('{');
            match split_default(body) {
                (_, Some(fallback)) if fallback.contains('$') => {
                    let expanded = substitute_with(&format!("{body}}}"), lookup)?;
                    out.push_str(&expanded);
                }
                _ => {
                    out.push_str(body);
                    out.push('}');
                }
            }
        }
    }
    out.push_str(&unescaped[last..]);

    Ok(out)
}

fn resolve(body: &str, lookup: &dyn Fn(&str) -> Option<String>) -> DecodeResult<String> {
    let (name, fallback) = split_default(body);
    if !variable_name().is_match(name) {
        return Err(DecodeError::InvalidVariable(name.to_string()));
    }

    let value = lookup(name).filter(|v| !v.is_empty());
    Ok(match (value, fallback) {
        (Some(value), _) => value,
        (None, Some(fallback)) => fallback.replace("$$", "$"),
        (None, None) => String::new(),
    })
}

fn split_default(body: &str) -> (&str, Option<&str>) {
    let body = body.strip_prefix("env:").unwrap_or(body);
    match body.find(DEFAULT_SEPARATOR) {
        Some(i) => (&body[..i], Some(&body[i + DEFAULT_SEPARATOR.len()..])),
        None => (body, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn run(input: &str, vars: &[(&str, &str)]) -> DecodeResult<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        substitute_with(input, &|name| vars.get(name).cloned())
    }

    #[test]
    fn test_no_references() {
        assert_eq!(run("key: value\nother: data", &[]).unwrap(), "key: value\nother: data");
    }

    #[test]
    fn test_defined_variable() {
        assert_eq!(run("key: ${TEST_VAR}", &[("TEST_VAR", "v")]).unwrap(), "key: v");
    }

    #[test]
    fn test_undefined_variable_is_empty() {
        assert_eq!(run("key: ${UNDEFINED_VAR}", &[]).unwrap(), "key: ");
    }

    #[test]
    fn test_default_value() {
        assert_eq!(
            run("key: ${UNDEFINED:-default with spaces}", &[]).unwrap(),
            "key: default with spaces"
        );
        assert_eq!(
            run("key: ${DEFINED:-default}", &[("DEFINED", "set")]).unwrap(),
            "key: set"
        );
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(run("key: ${env:TEST_VAR}", &[("TEST_VAR", "x")]).unwrap(), "key: x");
    }

    #[test]
    fn test_escaped_reference() {
        assert_eq!(run("key: $${NOT_REPLACED}", &[]).unwrap(), "key: ${NOT_REPLACED}");
        assert_eq!(run("key: $$${NOT_REPLACED}", &[]).unwrap(), "key: $");
        assert_eq!(run("key: $$$${NOT_REPLACED}", &[]).unwrap(), "key: $${NOT_REPLACED}");
    }

    #[test]
    fn test_escaped_dollar_in_text() {
        assert_eq!(run("key: a $$ b", &[]).unwrap(), "key: a $ b");
        assert_eq!(run("key: a $ b", &[]).unwrap(), "key: a $ b");
    }

    #[test]
    fn test_nested_reference_in_default_is_literal() {
        assert_eq!(
            run("key: ${UNDEFINED:-${FALLBACK_VAR}}", &[("FALLBACK_VAR", "f")]).unwrap(),
            "key: ${FALLBACK_VAR}"
        );
    }

    #[test]
    fn test_escaped_reference_expands_default() {
        assert_eq!(
            run("key: $${STRING_VALUE:-${STRING_VALUE}}", &[("STRING_VALUE", "value")]).unwrap(),
            "key: ${STRING_VALUE:-value}"
        );
        assert_eq!(
            run("key: ${UNDEFINED_KEY:-$${UNDEFINED_KEY}}", &[]).unwrap(),
            "key: ${UNDEFINED_KEY}"
        );
    }

    #[test]
    fn test_key_position_and_multiple_references() {
        assert_eq!(
            run("${K}: ${A} and ${B}", &[("K", "key"), ("A", "1"), ("B", "2")]).unwrap(),
            "key: 1 and 2"
        );
    }

    #[test]
    fn test_value_retains_special_characters() {
        assert_eq!(
            run("key: ${PIPE_VAR}", &[("PIPE_VAR", "value|with$|pipes")]).unwrap(),
            "key: value|with$|pipes"
        );
    }

    #[test]
    fn test_invalid_name_fails() {
        let err = run("key: ${ERR_INVALID_SUFFIX:?error}", &[]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidVariable(ref n) if n == "ERR_INVALID_SUFFIX:?error"));
    }

    #[test]
    fn test_body_without_leading_name_is_kept() {
        assert_eq!(run("key: ${1ABC}", &[]).unwrap(), "key: ${1ABC}");
        assert_eq!(run("key: ${}", &[]).unwrap(), "key: ${}");
        assert_eq!(
            run("url: https://x/${1ABC}/${HOST}", &[("HOST", "h")]).unwrap(),
            "url: https://x/${1ABC}/h"
        );
    }
}
