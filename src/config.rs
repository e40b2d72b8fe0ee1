//! Service configuration: an optional TOML file with environment overrides.
//!
//! Precedence is environment variable > config file > built-in default,
//! matching how deployments inject secrets. `validate()` runs once at
//! startup and refuses to boot on a broken pricing table or slab ladder —
//! a missing plan price must never silently quote zero.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub business: BusinessConfig,
    pub pricing: PricingConfig,
    pub delivery: DeliveryConfig,
    pub razorpay: RazorpayConfig,
    pub admin: AdminConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusinessConfig {
    /// Display name used as the UPI payee name and on the root endpoint.
    pub name: String,
    /// Virtual Payment Address collecting UPI payments.
    pub upi_vpa: String,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            name: "Sharma Tiffin".into(),
            upi_vpa: "sharmatiffin@upi".into(),
        }
    }
}

/// Unit prices per plan, in whole rupees.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub daily_meal: u32,
    pub breakfast: u32,
    pub monthly_veg: u32,
    pub monthly_non_veg: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            daily_meal: 90,
            breakfast: 40,
            monthly_veg: 2400,
            monthly_non_veg: 2900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub slabs: Vec<Slab>,
}

/// One distance tier: orders up to `max_km` pay `fee` rupees for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Slab {
    pub max_km: f64,
    pub fee: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            slabs: vec![
                Slab { max_km: 3.0, fee: 20 },
                Slab { max_km: 7.0, fee: 40 },
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RazorpayConfig {
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    /// Distinct secret for the asynchronous event webhook. No fallback to
    /// `key_secret`: absence fails verification with a server error.
    pub webhook_secret: Option<String>,
    /// Public base URL the provider redirects back to, e.g.
    /// `https://orders.example.com`.
    pub callback_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub pin: String,
    pub session_ttl_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            pin: "1234".into(),
            session_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4000,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides
    /// and validate. A missing file is fine — defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = fs::read_to_string(p)
                    .with_context(|| format!("failed to read config file {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", p.display()))?
            }
            Some(p) => {
                info!("config file {} not found, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(name) = non_empty_env("BUSINESS_NAME") {
            self.business.name = name;
        }
        if let Some(vpa) = non_empty_env("UPI_ID") {
            self.business.upi_vpa = vpa;
        }
        if let Some(pin) = non_empty_env("ADMIN_PIN") {
            self.admin.pin = pin;
        }
        if let Some(key) = non_empty_env("RAZORPAY_KEY_ID") {
            self.razorpay.key_id = Some(key);
        }
        if let Some(secret) = non_empty_env("RAZORPAY_KEY_SECRET") {
            self.razorpay.key_secret = Some(secret);
        }
        if let Some(secret) = non_empty_env("RAZORPAY_WEBHOOK_SECRET") {
            self.razorpay.webhook_secret = Some(secret);
        }
        if let Some(url) = non_empty_env("CALLBACK_BASE_URL") {
            self.razorpay.callback_base_url = Some(url);
        }
        if let Some(port) = non_empty_env("PORT").and_then(|p| p.parse().ok()) {
            self.gateway.port = port;
        }
    }

    /// Fail fast on configuration that would misprice orders.
    pub fn validate(&self) -> Result<()> {
        for (plan, price) in [
            ("daily_meal", self.pricing.daily_meal),
            ("breakfast", self.pricing.breakfast),
            ("monthly_veg", self.pricing.monthly_veg),
            ("monthly_non_veg", self.pricing.monthly_non_veg),
        ] {
            if price == 0 {
                bail!("pricing.{plan} is missing or zero — refusing to quote free meals");
            }
        }

        if self.delivery.slabs.is_empty() {
            bail!("delivery.slabs must contain at least one slab");
        }
        for pair in self.delivery.slabs.windows(2) {
            if pair[1].max_km <= pair[0].max_km {
                bail!(
                    "delivery.slabs must be strictly ascending by max_km (found {} after {})",
                    pair[1].max_km,
                    pair[0].max_km
                );
            }
        }
        for slab in &self.delivery.slabs {
            if !slab.max_km.is_finite() || slab.max_km < 0.0 {
                bail!("delivery slab max_km must be a non-negative number");
            }
        }

        if self.admin.pin.trim().is_empty() {
            bail!("admin.pin must not be empty");
        }

        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn parses_full_toml() {
        let raw = r#"
            [business]
            name = "Annapurna Meals"
            upi_vpa = "annapurna@ybl"

            [pricing]
            daily_meal = 110
            breakfast = 50
            monthly_veg = 2600
            monthly_non_veg = 3100

            [delivery]
            slabs = [
                { max_km = 2.0, fee = 10 },
                { max_km = 6.0, fee = 30 },
                { max_km = 12.0, fee = 60 },
            ]

            [admin]
            pin = "9876"

            [gateway]
            port = 8080
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.business.name, "Annapurna Meals");
        assert_eq!(config.pricing.daily_meal, 110);
        assert_eq!(config.delivery.slabs.len(), 3);
        assert_eq!(config.gateway.port, 8080);
        // unset sections keep defaults
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert!(config.razorpay.key_id.is_none());
    }

    #[test]
    fn zero_price_refuses_to_validate() {
        let mut config = Config::default();
        config.pricing.breakfast = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("breakfast"));
    }

    #[test]
    fn empty_slabs_refuse_to_validate() {
        let mut config = Config::default();
        config.delivery.slabs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unsorted_slabs_refuse_to_validate() {
        let mut config = Config::default();
        config.delivery.slabs = vec![
            Slab { max_km: 7.0, fee: 40 },
            Slab { max_km: 3.0, fee: 20 },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_pin_refuses_to_validate() {
        let mut config = Config::default();
        config.admin.pin = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_beat_file_values() {
        // no other test touches these variables, so this stays safe under
        // the parallel test runner
        env::set_var("ADMIN_PIN", "7777");
        env::set_var("UPI_ID", "env@upi");

        let mut config = Config::default();
        config.admin.pin = "1234".into();
        config.apply_env_overrides();

        assert_eq!(config.admin.pin, "7777");
        assert_eq!(config.business.upi_vpa, "env@upi");

        env::remove_var("ADMIN_PIN");
        env::remove_var("UPI_ID");
    }
}
