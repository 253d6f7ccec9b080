//! Well-known stream, group and category names.
//!
//! The stream and group names are process-wide configuration shared by the
//! API (producer side) and the worker (consumer side). They must match for
//! the worker to see what the API appends.

/// Default stream that carries notification requests.
pub const DEFAULT_STREAM: &str = "notifications";

/// Default consumer group reading [`DEFAULT_STREAM`].
pub const DEFAULT_GROUP: &str = "notification-group";

/// Stream and group names resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub stream: String,
    pub group: String,
}

impl StreamSettings {
    /// Load the names from environment variables.
    ///
    /// | Env Var               | Default              |
    /// |-----------------------|----------------------|
    /// | `NOTIFICATION_STREAM` | `notifications`      |
    /// | `NOTIFICATION_GROUP`  | `notification-group` |
    pub fn from_env() -> Self {
        Self {
            stream: non_empty_env("NOTIFICATION_STREAM")
                .unwrap_or_else(|| DEFAULT_STREAM.to_string()),
            group: non_empty_env("NOTIFICATION_GROUP")
                .unwrap_or_else(|| DEFAULT_GROUP.to_string()),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            group: DEFAULT_GROUP.to_string(),
        }
    }
}

/// Derive a consumer identity that is unique per running process.
///
/// Uses `CONSUMER_ID` when set, otherwise `<hostname>-<pid>`.
pub fn consumer_identity() -> String {
    if let Some(id) = non_empty_env("CONSUMER_ID") {
        return id;
    }
    identity_from(&hostname(), std::process::id())
}

fn identity_from(host: &str, pid: u32) -> String {
    format!("{host}-{pid}")
}

fn hostname() -> String {
    non_empty_env("HOSTNAME")
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
