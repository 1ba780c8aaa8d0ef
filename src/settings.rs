use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Memory,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Backend {
    pub kind: BackendKind,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Server {
    pub listen: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Credits {
    pub welcome_bonus: i64,
    pub daily_login_bonus: i64,
    pub referral_bonus: i64,
    pub referred_bonus: i64,
    pub upvote_reward: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Cache {
    pub profile_ttl_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Requests {
    pub timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Push {
    pub url: String,
    pub access_token: Option<String>,
    pub enabled: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Realtime {
    pub poll_interval_secs: u64,
}

impl Realtime {
    /// Polling fallback period, never shorter than a second.
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Validation {
    pub allowed_email_domains: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub backend: Backend,
    pub postgres: Postgres,
    pub server: Server,
    pub credits: Credits,
    pub cache: Cache,
    pub requests: Requests,
    pub push: Push,
    pub realtime: Realtime,
    pub validation: Validation,
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Self::defaults()?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("STRIDE").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("backend.kind", "postgres")?
            .set_default("postgres.url", "postgres://localhost/stride_campus")?
            .set_default("postgres.max_connections", 5)?
            .set_default("server.listen", "0.0.0.0:8080")?
            .set_default("credits.welcome_bonus", 120)?
            .set_default("credits.daily_login_bonus", 5)?
            .set_default("credits.referral_bonus", 50)?
            .set_default("credits.referred_bonus", 25)?
            .set_default("credits.upvote_reward", 1)?
            .set_default("cache.profile_ttl_secs", 300)?
            .set_default("requests.timeout_ms", 8000)?
            .set_default("push.url", "https://exp.host/--/api/v2/push/send")?
            .set_default("push.enabled", false)?
            .set_default("realtime.poll_interval_secs", 15)?
            .set_default("validation.allowed_email_domains", vec![".edu"])
    }

    /// Settings with every default and no file or environment layered on top.
    pub fn default_values() -> Result<Self, ConfigError> {
        Self::defaults()?.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize() {
        let settings = Settings::default_values().unwrap();

        assert_eq!(settings.backend.kind, BackendKind::Postgres);
        assert_eq!(settings.credits.welcome_bonus, 120);
        assert_eq!(settings.credits.daily_login_bonus, 5);
        assert_eq!(settings.cache.profile_ttl_secs, 300);
        assert_eq!(settings.validation.allowed_email_domains, vec![".edu"]);
        assert!(settings.push.access_token.is_none());
        assert_eq!(settings.realtime.poll_interval().as_secs(), 15);
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let realtime = Realtime {
            poll_interval_secs: 0,
        };

        assert_eq!(realtime.poll_interval().as_secs(), 1);
    }
}
