use std::str::FromStr;

/// Get environment variable with FARMGATE_ prefix, falling back to unprefixed version
///
/// ```rust
/// use farmgate::utils::get_env_with_prefix;
///
/// // Checks FARMGATE_TRIAL_DAYS first, then TRIAL_DAYS
/// let trial_days = get_env_with_prefix("TRIAL_DAYS");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("FARMGATE_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Read and parse a prefixed environment variable.
///
/// Values that fail to parse are ignored with a warning, leaving the
/// caller's default in place.
pub fn parse_env_with_prefix<T: FromStr>(key: &str) -> Option<T> {
    let raw = get_env_with_prefix(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key = key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_with_prefix() {
        unsafe {
            std::env::set_var("FARMGATE_ENV_TEST_VAR", "prefixed_value");
        }
        assert_eq!(get_env_with_prefix("ENV_TEST_VAR"), Some("prefixed_value".to_string()));
        unsafe {
            std::env::remove_var("FARMGATE_ENV_TEST_VAR");
        }

        unsafe {
            std::env::set_var("ENV_FALLBACK_VAR", "unprefixed_value");
        }
        assert_eq!(get_env_with_prefix("ENV_FALLBACK_VAR"), Some("unprefixed_value".to_string()));
        unsafe {
            std::env::remove_var("ENV_FALLBACK_VAR");
        }

        assert_eq!(get_env_with_prefix("ENV_NON_EXISTENT_VAR"), None);
    }

    #[test]
    fn test_parse_env_with_prefix() {
        unsafe {
            std::env::set_var("FARMGATE_ENV_PARSE_OK", " 42 ");
            std::env::set_var("FARMGATE_ENV_PARSE_BAD", "forty-two");
        }
        assert_eq!(parse_env_with_prefix::<u32>("ENV_PARSE_OK"), Some(42));
        assert_eq!(parse_env_with_prefix::<u32>("ENV_PARSE_BAD"), None);
        unsafe {
            std::env::remove_var("FARMGATE_ENV_PARSE_OK");
            std::env::remove_var("FARMGATE_ENV_PARSE_BAD");
        }
    }
}
