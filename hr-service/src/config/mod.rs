use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub payu: PayuConfig,
    pub mercadopago: MercadoPagoConfig,
    pub cron: CronConfig,
    pub plan_limits: PlanLimitsConfig,
    pub service_name: String,
    pub log_level: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PayuConfig {
    pub api_key: Secret<String>,
    pub merchant_id: String,
    pub account_id: String,
    pub test_mode: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub struct MercadoPagoConfig {
    pub access_token: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct CronConfig {
    pub secret: Secret<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PlanLimitsConfig {
    /// Active employees a free-tier company may register.
    pub free_employee_limit: i64,
    /// TTL for cached profile tier lookups, in seconds.
    pub profile_cache_ttl_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("HR_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("HR_SERVICE_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()?;

        let db_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let payu_api_key = env::var("PAYU_API_KEY").unwrap_or_default();
        let payu_merchant_id = env::var("PAYU_MERCHANT_ID").unwrap_or_default();
        let payu_account_id = env::var("PAYU_ACCOUNT_ID").unwrap_or_default();
        let payu_test_mode = env::var("PAYU_TEST")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let mp_access_token = env::var("MERCADOPAGO_ACCESS_TOKEN").unwrap_or_default();
        let mp_webhook_secret = env::var("MERCADOPAGO_WEBHOOK_SECRET").unwrap_or_default();
        let mp_api_base_url = env::var("MERCADOPAGO_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.mercadopago.com".to_string());

        let cron_secret = env::var("CRON_SECRET").expect("CRON_SECRET must be set");

        let free_employee_limit = env::var("FREE_PLAN_EMPLOYEE_LIMIT")
            .unwrap_or_else(|_| "5".to_string())
            .parse()?;
        let profile_cache_ttl_seconds = env::var("PROFILE_CACHE_TTL_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()?;

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            payu: PayuConfig {
                api_key: Secret::new(payu_api_key),
                merchant_id: payu_merchant_id,
                account_id: payu_account_id,
                test_mode: payu_test_mode,
            },
            mercadopago: MercadoPagoConfig {
                access_token: Secret::new(mp_access_token),
                webhook_secret: Secret::new(mp_webhook_secret),
                api_base_url: mp_api_base_url,
            },
            cron: CronConfig {
                secret: Secret::new(cron_secret),
            },
            plan_limits: PlanLimitsConfig {
                free_employee_limit,
                profile_cache_ttl_seconds,
            },
            service_name: "hr-service".to_string(),
            log_level,
        })
    }
}
