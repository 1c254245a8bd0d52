//! Load config from the environment. There is no config file.

use std::time::Duration;

use crate::logging::LogFormat;

pub const DEFAULT_SERVICE_TYPE: &str = "_lanchat._tcp.local.";

/// Runtime configuration.
/// Env overrides: LANCHAT_PORT, LANCHAT_SERVICE, LANCHAT_DIAL_TIMEOUT_SECS, LANCHAT_LOG_FORMAT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// TCP listen port (default 0: ephemeral, whatever the OS assigns is advertised).
    pub port: u16,
    /// mDNS service type browsed and advertised.
    pub service_type: String,
    /// Outbound dial timeout (default 5s).
    pub dial_timeout: Duration,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 0,
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            dial_timeout: lanchat_core::transport::DEFAULT_DIAL_TIMEOUT,
            log_format: LogFormat::Human,
        }
    }
}

/// Load config: defaults, then env vars. Returns the config plus a warning for
/// every value that was present but unusable (logged once logging is up).
pub fn load() -> (Config, Vec<String>) {
    from_lookup(|key| std::env::var(key).ok())
}

fn from_lookup(get: impl Fn(&str) -> Option<String>) -> (Config, Vec<String>) {
    let mut c = Config::default();
    let mut warnings = Vec::new();
    if let Some(s) = get("LANCHAT_PORT") {
        match s.trim().parse::<u16>() {
            Ok(p) => c.port = p,
            Err(_) => warnings.push(format!("ignoring LANCHAT_PORT={s:?}: not a port")),
        }
    }
    if let Some(s) = get("LANCHAT_SERVICE") {
        match normalize_service_type(&s) {
            Some(ty) => c.service_type = ty,
            None => warnings.push(format!("ignoring LANCHAT_SERVICE={s:?}: expected _name._tcp")),
        }
    }
    if let Some(s) = get("LANCHAT_DIAL_TIMEOUT_SECS") {
        match s.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => c.dial_timeout = Duration::from_secs(secs),
            _ => warnings.push(format!("ignoring LANCHAT_DIAL_TIMEOUT_SECS={s:?}")),
        }
    }
    if let Some(s) = get("LANCHAT_LOG_FORMAT") {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" => c.log_format = LogFormat::Human,
            "json" => c.log_format = LogFormat::Json,
            _ => warnings.push(format!("ignoring LANCHAT_LOG_FORMAT={s:?}")),
        }
    }
    (c, warnings)
}

/// Accept `_chat._tcp`, `_chat._tcp.local` or `_chat._tcp.local.`; always return the
/// fully qualified form mDNS expects.
fn normalize_service_type(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('.');
    let base = trimmed.strip_suffix(".local").unwrap_or(trimmed);
    let (name, proto) = base.split_once('.')?;
    let valid_name = name.len() > 1 && name.starts_with('_') && !name.contains('.');
    if !valid_name || !(proto == "_tcp" || proto == "_udp") {
        return None;
    }
    Some(format!("{base}.local."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_from(vars: &[(&str, &str)]) -> (Config, Vec<String>) {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_without_env() {
        let (c, warnings) = load_from(&[]);
        assert_eq!(c, Config::default());
        assert_eq!(c.port, 0);
        assert_eq!(c.service_type, "_lanchat._tcp.local.");
        assert!(warnings.is_empty());
    }

    #[test]
    fn env_overrides() {
        let (c, warnings) = load_from(&[
            ("LANCHAT_PORT", "4567"),
            ("LANCHAT_SERVICE", "_meuchat._tcp"),
            ("LANCHAT_DIAL_TIMEOUT_SECS", "2"),
            ("LANCHAT_LOG_FORMAT", "JSON"),
        ]);
        assert!(warnings.is_empty());
        assert_eq!(c.port, 4567);
        assert_eq!(c.service_type, "_meuchat._tcp.local.");
        assert_eq!(c.dial_timeout, Duration::from_secs(2));
        assert_eq!(c.log_format, LogFormat::Json);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let (c, warnings) = load_from(&[
            ("LANCHAT_PORT", "99999"),
            ("LANCHAT_SERVICE", "chat"),
            ("LANCHAT_DIAL_TIMEOUT_SECS", "0"),
            ("LANCHAT_LOG_FORMAT", "xml"),
        ]);
        assert_eq!(c, Config::default());
        assert_eq!(warnings.len(), 4);
    }

    #[test]
    fn service_type_forms() {
        assert_eq!(normalize_service_type("_x._tcp.local.").as_deref(), Some("_x._tcp.local."));
        assert_eq!(normalize_service_type("_x._tcp.local").as_deref(), Some("_x._tcp.local."));
        assert_eq!(normalize_service_type("_x._udp").as_deref(), Some("_x._udp.local."));
        assert_eq!(normalize_service_type("_x._sctp"), None);
        assert_eq!(normalize_service_type("x._tcp"), None);
        assert_eq!(normalize_service_type("_._tcp"), None);
    }
}
