//! Shared utility functions used across the codebase.

/// Return the value of `$HOME`, falling back to `/root`.
pub fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "/root".to_string())
}

/// Quote a string for POSIX shells, `shlex.quote` style.
///
/// Safe strings pass through unchanged; everything else is wrapped in
/// single quotes with embedded quotes escaped as `'"'"'`.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | '@' | '+' | ','))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

/// Redacted preview of a secret: a fixed prefix plus its last six
/// characters. Never returns the full value.
pub fn token_preview(prefix: &str, secret: &str) -> String {
    let tail: String = secret
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{}...{}", prefix, tail)
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_passes_safe_strings() {
        assert_eq!(shell_quote("sk-ant-api03-abc"), "sk-ant-api03-abc");
        assert_eq!(shell_quote("/usr/local/bin"), "/usr/local/bin");
    }

    #[test]
    fn shell_quote_wraps_unsafe_strings() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
    }

    #[test]
    fn token_preview_keeps_only_the_tail() {
        let p = token_preview("sk-ant-oat01", "sk-ant-oat01-secret-abcdef");
        assert_eq!(p, "sk-ant-oat01...abcdef");
        assert!(!p.contains("secret"));
    }

    #[test]
    fn token_preview_short_secret() {
        assert_eq!(token_preview("sk-ant", "xyz"), "sk-ant...xyz");
    }
}
