// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Word splitting for the `args` and `env` definition fields.

use log::warn;

/// Split on whitespace. Double quotes group words and are removed; inside
/// quotes a backslash escapes `"` and `\`.
pub fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            '\\' if in_quotes => match chars.next() {
                Some(next @ ('"' | '\\')) => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Build the exec argument vector. argv[0] is always `path`; a leading
/// `args` word equal to `path` is taken as that argv[0].
pub fn build_argv(path: &str, args: &str) -> Vec<String> {
    let mut words = split_words(args);
    if words.first().is_some_and(|w| w == path) {
        return words;
    }
    words.insert(0, path.to_string());
    words
}

/// Parse `KEY=VALUE` assignments. Words without `=` are skipped.
pub fn parse_env(env: &str) -> Vec<(String, String)> {
    split_words(env)
        .into_iter()
        .filter_map(|word| match word.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
            _ => {
                warn!("ignoring malformed environment assignment '{word}'");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plain_words() {
        assert_eq!(split_words("  a  b\tc "), vec!["a", "b", "c"]);
        assert!(split_words("").is_empty());
        assert!(split_words("   ").is_empty());
    }

    #[test]
    fn test_split_quoted_words() {
        assert_eq!(
            split_words(r#"/bin/sh -c "sleep 3600""#),
            vec!["/bin/sh", "-c", "sleep 3600"]
        );
        assert_eq!(split_words(r#"x"y z"w"#), vec!["xy zw"]);
        assert_eq!(split_words(r#""""#), vec![""]);
        assert_eq!(split_words(r#""a \"b\" \\ \n""#), vec![r#"a "b" \ \n"#]);
    }

    #[test]
    fn test_build_argv_prepends_path() {
        assert_eq!(build_argv("/bin/sleep", "10"), vec!["/bin/sleep", "10"]);
        assert_eq!(build_argv("/bin/true", ""), vec!["/bin/true"]);
    }

    #[test]
    fn test_build_argv_keeps_explicit_argv0() {
        assert_eq!(
            build_argv("/bin/sh", r#"/bin/sh -c "sleep 3600""#),
            vec!["/bin/sh", "-c", "sleep 3600"]
        );
    }

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env(r#"A=1 B="two words" C= junk =x"#),
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two words".to_string()),
                ("C".to_string(), String::new()),
            ]
        );
    }
}
