//! systemd-style environment files

use crate::domain::DomainError;
use tracing::{debug, warn};

/// Parse an environment file into key-value pairs, in file order
///
/// Accepts `KEY=VALUE`, `KEY="VALUE"` and `KEY='VALUE'`, skipping comments and
/// blank lines. A leading `-` on the path marks the file optional: a missing
/// optional file yields no variables.
pub fn parse_environment_file(path: &str) -> Result<Vec<(String, String)>, DomainError> {
    let (actual_path, optional) = match path.strip_prefix('-') {
        Some(stripped) => (stripped, true),
        None => (path, false),
    };

    let contents = match std::fs::read_to_string(actual_path) {
        Ok(contents) => contents,
        Err(e) if optional && e.kind() == std::io::ErrorKind::NotFound => {
            debug!(file = actual_path, "optional environment file not found");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(DomainError::InvalidConfiguration(format!(
                "Failed to read environment file '{actual_path}': {e}"
            )))
        }
    };

    let mut vars = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match trimmed.split_once('=') {
            Some((key, raw_value)) => {
                let value = unquote(raw_value.trim());
                vars.push((key.trim().to_string(), value.to_string()));
            }
            None => warn!(
                file = actual_path,
                line = line_num + 1,
                "skipping line without '=' in environment file"
            ),
        }
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env");
        std::fs::write(
            &path,
            r#"# web settings
PORT=8080
PATH="/usr/local/bin:/usr/bin"
QUOTED='single'
EMPTY=
malformed line without equals

LANG=en_US.UTF-8
"#,
        )
        .unwrap();

        let vars: HashMap<String, String> = parse_environment_file(path.to_str().unwrap())
            .unwrap()
            .into_iter()
            .collect();

        assert_eq!(vars["PORT"], "8080");
        assert_eq!(vars["PATH"], "/usr/local/bin:/usr/bin");
        assert_eq!(vars["QUOTED"], "single");
        assert_eq!(vars["EMPTY"], "");
        assert_eq!(vars["LANG"], "en_US.UTF-8");
        assert_eq!(vars.len(), 5);
    }

    #[test]
    fn test_missing_file() {
        assert!(parse_environment_file("/nonexistent/env").is_err());
    }

    #[test]
    fn test_missing_optional_file() {
        assert_eq!(parse_environment_file("-/nonexistent/env").unwrap(), vec![]);
    }
}
