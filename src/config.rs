use crate::acquisition::ERROR_BUDGET;
use crate::permission::{PollPolicy, PERMISSION_MAX_ATTEMPTS, PERMISSION_POLL_INTERVAL};
use crate::types::Roles;
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for a camera session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Writable root the engine reads its staged resources from.
    pub storage_root: PathBuf,
    /// Bundled resource tree copied into `storage_root` at startup, if any.
    pub bundle_dir: Option<PathBuf>,
    pub permission_poll: PollPolicy,
    pub error_budget: u32,
    /// Roles that must be found by the scan for the session to continue.
    pub required_roles: Roles,
    /// Keep going when a device could not be opened.
    pub proceed_on_connect_failure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("depthcam-data"),
            bundle_dir: None,
            permission_poll: PollPolicy::default(),
            error_budget: ERROR_BUDGET,
            required_roles: Roles::TOF | Roles::RGB,
            proceed_on_connect_failure: false,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `DEPTHCAM_*` environment variables.
    ///
    /// - `DEPTHCAM_STORAGE_ROOT`, `DEPTHCAM_BUNDLE_DIR`
    /// - `DEPTHCAM_PERMISSION_ATTEMPTS`, `DEPTHCAM_PERMISSION_INTERVAL_MS`
    /// - `DEPTHCAM_ERROR_BUDGET`
    /// - `DEPTHCAM_REQUIRE_BOTH_ROLES`, `DEPTHCAM_ALLOW_DEGRADED`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let require_both = read_bool(&lookup, "DEPTHCAM_REQUIRE_BOTH_ROLES", true);
        let interval_ms = read_u32(
            &lookup,
            "DEPTHCAM_PERMISSION_INTERVAL_MS",
            PERMISSION_POLL_INTERVAL.as_millis() as u32,
        );

        let config = Self {
            storage_root: read_path(&lookup, "DEPTHCAM_STORAGE_ROOT")
                .unwrap_or(defaults.storage_root),
            bundle_dir: read_path(&lookup, "DEPTHCAM_BUNDLE_DIR"),
            permission_poll: PollPolicy {
                max_attempts: read_u32(
                    &lookup,
                    "DEPTHCAM_PERMISSION_ATTEMPTS",
                    PERMISSION_MAX_ATTEMPTS,
                ),
                interval: Duration::from_millis(u64::from(interval_ms)),
            },
            error_budget: read_u32(&lookup, "DEPTHCAM_ERROR_BUDGET", ERROR_BUDGET),
            required_roles: if require_both {
                Roles::TOF | Roles::RGB
            } else {
                Roles::empty()
            },
            proceed_on_connect_failure: read_bool(&lookup, "DEPTHCAM_ALLOW_DEGRADED", false),
        };

        log::debug!(
            "Session config: storage={} bundle={:?} poll={}x{:?} budget={} roles={:?} degraded={}",
            config.storage_root.display(),
            config.bundle_dir,
            config.permission_poll.max_attempts,
            config.permission_poll.interval,
            config.error_budget,
            config.required_roles,
            config.proceed_on_connect_failure,
        );
        config
    }
}

fn read_bool<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str, default: bool) -> bool {
    lookup(name)
        .and_then(|v| {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        })
        .unwrap_or(default)
}

fn read_u32<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str, default: u32) -> u32 {
    lookup(name)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn read_path<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> Option<PathBuf> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> SessionConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SessionConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.permission_poll.max_attempts, 30);
        assert_eq!(config.permission_poll.interval, Duration::from_millis(500));
        assert_eq!(config.error_budget, 2);
        assert_eq!(config.required_roles, Roles::TOF | Roles::RGB);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DEPTHCAM_STORAGE_ROOT", "/var/lib/depthcam"),
            ("DEPTHCAM_BUNDLE_DIR", " /usr/share/depthcam/openni "),
            ("DEPTHCAM_PERMISSION_ATTEMPTS", "4"),
            ("DEPTHCAM_PERMISSION_INTERVAL_MS", "10"),
            ("DEPTHCAM_ERROR_BUDGET", "5"),
            ("DEPTHCAM_REQUIRE_BOTH_ROLES", "off"),
            ("DEPTHCAM_ALLOW_DEGRADED", "YES"),
        ]);
        assert_eq!(config.storage_root, PathBuf::from("/var/lib/depthcam"));
        assert_eq!(
            config.bundle_dir,
            Some(PathBuf::from("/usr/share/depthcam/openni"))
        );
        assert_eq!(config.permission_poll.max_attempts, 4);
        assert_eq!(config.permission_poll.interval, Duration::from_millis(10));
        assert_eq!(config.error_budget, 5);
        assert!(config.required_roles.is_empty());
        assert!(config.proceed_on_connect_failure);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = config_from(&[
            ("DEPTHCAM_PERMISSION_ATTEMPTS", "lots"),
            ("DEPTHCAM_ERROR_BUDGET", "-1"),
            ("DEPTHCAM_ALLOW_DEGRADED", "maybe"),
            ("DEPTHCAM_STORAGE_ROOT", "   "),
        ]);
        assert_eq!(config, SessionConfig::default());
    }
}
