//! Exporter header resolution.

use std::collections::HashMap;

use otelconf_schema::exporter::NameStringValuePair;

use crate::error::ConfigError;

/// Merges `headers_list` and the structured `headers` list.
///
/// The list string is applied first and the structured entries second, so a
/// structured entry wins over a list entry with the same name. Within each
/// source the last declaration of a name wins.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidHeaderList`] when a `headers_list` entry has
/// no `=` or an empty name.
pub fn resolve_headers(
    structured: Option<&[NameStringValuePair]>,
    list: Option<&str>,
) -> Result<HashMap<String, String>, ConfigError> {
    let mut headers = match list {
        Some(list) => parse_headers_list(list)?,
        None => HashMap::new(),
    };

    for pair in structured.unwrap_or_default() {
        headers.insert(pair.name.clone(), pair.value.clone().unwrap_or_default());
    }

    Ok(headers)
}

/// Parses `key1=value1,key2=value2`.
///
/// Whitespace around names and values is trimmed and empty entries are
/// ignored.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidHeaderList`] naming the bad entry.
pub fn parse_headers_list(list: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut headers = HashMap::new();

    for entry in list.split(',') {
        if entry.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = entry.split_once('=') else {
            return Err(ConfigError::InvalidHeaderList(entry.trim().to_string()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::InvalidHeaderList(key.to_string()));
        }
        headers.insert(key.to_string(), value.trim().to_string());
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_no_headers() {
        assert!(resolve_headers(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_structured_only() {
        let headers = [
            NameStringValuePair::new("a", "1"),
            NameStringValuePair::new("b", "2"),
        ];
        assert_eq!(
            resolve_headers(Some(&headers), None).unwrap(),
            map(&[("a", "1"), ("b", "2")])
        );
    }

    #[test]
    fn test_list_only() {
        assert_eq!(
            resolve_headers(None, Some("a=1, b = 2 ,")).unwrap(),
            map(&[("a", "1"), ("b", "2")])
        );
    }

    #[test]
    fn test_structured_wins_over_list() {
        let headers = [NameStringValuePair::new("a", "structured")];
        assert_eq!(
            resolve_headers(Some(&headers), Some("a=list,b=list")).unwrap(),
            map(&[("a", "structured"), ("b", "list")])
        );
    }

    #[test]
    fn test_last_structured_entry_wins() {
        let headers = [
            NameStringValuePair::new("a", "first"),
            NameStringValuePair::new("a", "second"),
        ];
        assert_eq!(
            resolve_headers(Some(&headers), None).unwrap(),
            map(&[("a", "second")])
        );
    }

    #[test]
    fn test_null_value_is_empty() {
        let headers = [NameStringValuePair {
            name: "x".into(),
            value: None,
        }];
        assert_eq!(resolve_headers(Some(&headers), None).unwrap(), map(&[("x", "")]));
    }

    #[test]
    fn test_value_may_contain_equals() {
        assert_eq!(
            parse_headers_list("auth=a=b").unwrap(),
            map(&[("auth", "a=b")])
        );
    }

    #[test]
    fn test_empty_key() {
        let err = parse_headers_list("=value").unwrap_err();
        assert_eq!(err.to_string(), "invalid headers list: invalid key: \"\"");
    }

    #[test]
    fn test_missing_equals() {
        let err = resolve_headers(None, Some("a=1,broken")).unwrap_err();
        assert_eq!(err.to_string(), "invalid headers list: invalid key: \"broken\"");
    }
}
