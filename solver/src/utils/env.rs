use std::str::FromStr;

/// Reads a parameter from an environment variable, falling back to the
/// compiled-in default when the variable is absent or fails to parse.
///
/// The typical usage is to expose internal parameters that are not commonly
/// used enough to appear as command line options but might be used to tune
/// the behavior of an algorithm. All parameters of this crate use the
/// `TEMPO_` prefix.
pub fn env_or<T: FromStr>(var: &str, default: T) -> T {
    match std::env::var(var) {
        Ok(raw) => raw.parse().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_when_unset() {
        assert_eq!(env_or("TEMPO_TEST_UNSET_PARAM", 42u32), 42);
    }

    #[test]
    fn test_read_from_env() {
        std::env::set_var("TEMPO_TEST_SET_PARAM", "7");
        assert_eq!(env_or("TEMPO_TEST_SET_PARAM", 42u32), 7);
    }
}
