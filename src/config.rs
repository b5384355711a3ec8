//! Configuration resolution for the batch SSH execution engine.
//!
//! Numeric defaults resolve with a three-tier priority, same as the rest of
//! this codebase's ancestor used for its connection settings:
//!
//! 1. **Parameter** - explicitly supplied on `SessionConfig`/`BatchRequest`
//! 2. **Environment variable** - operator-wide override
//! 3. **Default** - built-in fallback
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_ENGINE_CONNECT_TIMEOUT` | 30s | Connection timeout in seconds |
//! | `SSH_ENGINE_MAX_CONCURRENT` | 50 | Default worker pool size |
//! | `SSH_ENGINE_RECONNECT_DELAY_BASE` | 0.5s | Base delay for intra-session reconnect backoff |
//! | `SSH_ENGINE_RETRY_INTERVAL` | 30s | Wall-clock pause between batch-level retry rounds |

use std::env;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONCURRENT: usize = 50;
pub const DEFAULT_RECONNECT_DELAY_BASE_MS: u64 = 500;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_KEEP_ALIVE_INTERVAL_SECS: u64 = 30;

const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_ENGINE_CONNECT_TIMEOUT";
const MAX_CONCURRENT_ENV_VAR: &str = "SSH_ENGINE_MAX_CONCURRENT";
const RECONNECT_DELAY_BASE_ENV_VAR: &str = "SSH_ENGINE_RECONNECT_DELAY_BASE_MS";
const RETRY_INTERVAL_ENV_VAR: &str = "SSH_ENGINE_RETRY_INTERVAL";

/// Resolve the connect timeout with priority: parameter -> env var -> default.
pub fn resolve_connect_timeout(param: Option<u64>) -> u64 {
    if let Some(v) = param {
        return v;
    }
    if let Ok(env_v) = env::var(CONNECT_TIMEOUT_ENV_VAR)
        && let Ok(v) = env_v.parse::<u64>()
    {
        return v;
    }
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Resolve the worker pool size with priority: parameter -> env var -> default.
pub fn resolve_max_concurrent(param: Option<usize>) -> usize {
    if let Some(v) = param {
        return v;
    }
    if let Ok(env_v) = env::var(MAX_CONCURRENT_ENV_VAR)
        && let Ok(v) = env_v.parse::<usize>()
    {
        return v;
    }
    DEFAULT_MAX_CONCURRENT
}

/// Resolve the reconnect backoff base delay (milliseconds) with priority:
/// parameter -> env var -> default.
pub fn resolve_reconnect_delay_base_ms(param: Option<u64>) -> u64 {
    if let Some(v) = param {
        return v;
    }
    if let Ok(env_v) = env::var(RECONNECT_DELAY_BASE_ENV_VAR)
        && let Ok(v) = env_v.parse::<u64>()
    {
        return v;
    }
    DEFAULT_RECONNECT_DELAY_BASE_MS
}

/// Resolve the batch-level retry interval (seconds) with priority:
/// parameter -> env var -> default.
pub fn resolve_retry_interval(param: Option<u64>) -> u64 {
    if let Some(v) = param {
        return v;
    }
    if let Ok(env_v) = env::var(RETRY_INTERVAL_ENV_VAR)
        && let Ok(v) = env_v.parse::<u64>()
    {
        return v;
    }
    DEFAULT_RETRY_INTERVAL_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    static ENV_TEST_MUTEX: once_cell::sync::Lazy<StdMutex<()>> =
        once_cell::sync::Lazy::new(|| StdMutex::new(()));

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    unsafe fn set_env(key: &str, value: &str) {
        unsafe { env::set_var(key, value) };
    }

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
    unsafe fn remove_env(key: &str) {
        unsafe { env::remove_var(key) };
    }

    #[test]
    fn connect_timeout_param_wins() {
        let result = resolve_connect_timeout(Some(60));
        assert_eq!(result, 60);
    }

    #[test]
    fn connect_timeout_param_beats_env() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        unsafe { set_env(CONNECT_TIMEOUT_ENV_VAR, "120") };
        let result = resolve_connect_timeout(Some(45));
        unsafe { remove_env(CONNECT_TIMEOUT_ENV_VAR) };
        assert_eq!(result, 45);
    }

    #[test]
    fn connect_timeout_env_used_without_param() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        unsafe { set_env(CONNECT_TIMEOUT_ENV_VAR, "90") };
        let result = resolve_connect_timeout(None);
        unsafe { remove_env(CONNECT_TIMEOUT_ENV_VAR) };
        assert_eq!(result, 90);
    }

    #[test]
    fn connect_timeout_falls_back_to_default() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        unsafe { remove_env(CONNECT_TIMEOUT_ENV_VAR) };
        assert_eq!(resolve_connect_timeout(None), DEFAULT_CONNECT_TIMEOUT_SECS);
    }

    #[test]
    fn max_concurrent_defaults() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        unsafe { remove_env(MAX_CONCURRENT_ENV_VAR) };
        assert_eq!(resolve_max_concurrent(None), DEFAULT_MAX_CONCURRENT);
    }

    #[test]
    fn retry_interval_param_wins() {
        assert_eq!(resolve_retry_interval(Some(5)), 5);
    }
}
