//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` and `${VAR}`: the value of `VAR`, an error if it is unset
//! - `${VAR:-default}`: `default` if `VAR` is unset or empty
//! - `${VAR-default}`: `default` only if `VAR` is unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use std::sync::LazyLock;

static PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?:(?P<op>:?-)(?P<default>[^}]*))?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("interpolation pattern is valid")
});

/// Interpolate variables from the process environment.
///
/// Every problem is collected so a config with several missing variables
/// reports all of them at once.
pub fn interpolate_env(input: &str) -> Result<String, Vec<String>> {
    interpolate(input, |name| std::env::var(name).ok())
}

/// Interpolate variables resolved by `lookup`.
pub fn interpolate<F>(input: &str, lookup: F) -> Result<String, Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = PATTERN.replace_all(input, |caps: &Captures| {
        let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
            return "$".to_string();
        };
        let name = name.as_str();
        let op = caps.name("op").map(|m| m.as_str());
        let default = caps.name("default").map(|m| m.as_str());

        match (lookup(name), op) {
            (Some(value), _) if value.contains(['\n', '\r']) => {
                errors.push(format!(
                    "environment variable '{name}' contains newlines, which is not allowed"
                ));
                caps[0].to_string()
            }
            (Some(value), Some(":-")) if value.is_empty() => default.unwrap_or("").to_string(),
            (Some(value), _) => value,
            (None, Some(_)) => default.unwrap_or("").to_string(),
            (None, None) => {
                errors.push(format!("environment variable '{name}' is not set"));
                caps[0].to_string()
            }
        }
    });
    let text = text.into_owned();

    if errors.is_empty() {
        Ok(text)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_bare_and_braced() {
        let env = lookup(&[("ROOT", "/data"), ("WORKER", "3")]);
        let text = interpolate("table_uri: $ROOT/events\nworker_id: ${WORKER}", env).unwrap();
        assert_eq!(text, "table_uri: /data/events\nworker_id: 3");
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        let errors =
            interpolate("a: $FIRST_MISSING, b: ${SECOND_MISSING}", lookup(&[])).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("FIRST_MISSING"));
        assert!(errors[1].contains("not set"));
    }

    #[test]
    fn test_defaults() {
        let env = lookup(&[("EMPTY", "")]);
        assert_eq!(interpolate("${UNSET:-dynamic}", &env).unwrap(), "dynamic");
        assert_eq!(interpolate("${UNSET-dynamic}", &env).unwrap(), "dynamic");
        assert_eq!(interpolate("${EMPTY:-dynamic}", &env).unwrap(), "dynamic");
        assert_eq!(interpolate("[${EMPTY-dynamic}]", &env).unwrap(), "[]");
    }

    #[test]
    fn test_set_value_wins_over_default() {
        let env = lookup(&[("STRATEGY", "grouped")]);
        assert_eq!(interpolate("${STRATEGY:-dynamic}", env).unwrap(), "grouped");
    }

    #[test]
    fn test_escape() {
        assert_eq!(interpolate("cost: $$5", lookup(&[])).unwrap(), "cost: $5");
    }

    #[test]
    fn test_newlines_rejected() {
        let env = lookup(&[("INJECT", "a\nstrategy: single"), ("CR", "a\rb")]);
        let errors = interpolate("x: $INJECT\ny: $CR", env).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.contains("newlines")));
    }

    #[test]
    fn test_plain_text_untouched() {
        let text = "table_uri: /tmp/table";
        assert_eq!(interpolate(text, lookup(&[])).unwrap(), text);
    }

    #[test]
    fn test_process_environment() {
        // PATH is set in any environment the tests run in.
        assert!(interpolate_env("${PATH}").is_ok());
        assert!(interpolate_env("${SNOWDRIFT_SURELY_UNSET_VARIABLE}").is_err());
    }
}
