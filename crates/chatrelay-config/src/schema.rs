use serde::{Deserialize, Serialize};

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_media_root() -> String {
    "./data/media".to_string()
}

fn default_media_sweep_interval_secs() -> u64 {
    3600
}

fn default_dedupe_ttl_secs() -> u64 {
    300
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Process-level boot configuration: everything needed before the first
/// database connection opens. Per-tenant settings (business hours,
/// automation toggles, default transfer strategy) live in the
/// `organization_settings` table, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    pub database_url: String,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default = "default_media_root")]
    pub media_root: String,

    #[serde(default = "default_media_sweep_interval_secs")]
    pub media_sweep_interval_secs: u64,

    #[serde(default = "default_dedupe_ttl_secs")]
    pub dedupe_ttl_secs: u64,

    /// Secret used to sign short-lived gateway WebSocket auth tokens.
    pub gateway_token_secret: String,

    /// Secret used to HMAC-sign outbound webhook deliveries.
    pub webhook_signing_secret: String,
}

impl BootConfig {
    #[must_use]
    pub fn log_level_or_default(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_when_toml_omits_them() {
        let toml = r#"
            database_url = "postgres://localhost/chatrelay"
            gateway_token_secret = "secret"
            webhook_signing_secret = "secret2"
        "#;
        let cfg: BootConfig = toml::from_str(toml).expect("parses");
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.media_sweep_interval_secs, 3600);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }
}
