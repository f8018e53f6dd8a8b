use anyhow::{anyhow, Result};
use std::env;
use std::str::FromStr;

/// Reads an environment variable and parses it, falling back to `default` when unset.
///
/// A variable that is set but fails to parse is an error: a malformed
/// threshold should stop the run rather than silently use the default.
pub fn get_env_var_or<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid value for {}='{}': {}", var, raw, e)),
        _ => Ok(default),
    }
}

/// Reads a boolean flag in the `"1"` / `"true"` / `"yes"` style.
pub fn get_env_flag(var: &str) -> bool {
    env::var(var)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
