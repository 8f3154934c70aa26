use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment, parse_f64,
    parse_u16, parse_u32, parse_u64,
};
use super::secret::load_or_create_secret_key;
use super::types::{
    AdminSettings, ApiSettings, ConfigError, CorsSettings, DatabaseSettings, LockSettings,
    MaintenanceSettings, OcrSettings, RasterSettings, RedisSettings, RuntimeSettings, S3Settings,
    SecuritySettings, ServerHost, ServerPort, ServerSettings, Settings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("KORRIGO_HOST", "0.0.0.0");
        let port = env_or_default("KORRIGO_PORT", "8000");

        let environment =
            parse_environment(env_optional("KORRIGO_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("KORRIGO_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Korrigo API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let secret_key = match env_optional("SECRET_KEY") {
            Some(value) => value,
            None => load_or_create_secret_key(),
        };

        let access_token_expire_minutes = parse_u64(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            env_or_default("ACCESS_TOKEN_EXPIRE_MINUTES", "10080"),
        )?;
        let algorithm = env_or_default("ALGORITHM", "HS256");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "korrigo");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "korrigo_db");
        let database_url = env_optional("DATABASE_URL");

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let s3_endpoint = env_or_default("S3_ENDPOINT", "http://localhost:9000");
        let s3_access_key = env_or_default("S3_ACCESS_KEY", "");
        let s3_secret_key = env_or_default("S3_SECRET_KEY", "");
        let s3_bucket = env_or_default("S3_BUCKET", "korrigo-copies");
        let s3_region = env_or_default("S3_REGION", "eu-west-1");

        let raster_dpi = parse_u32("RASTER_DPI", env_or_default("RASTER_DPI", "150"))?;
        let pdftoppm_path = env_or_default("PDFTOPPM_PATH", "pdftoppm");
        let max_upload_size_mb =
            parse_u64("MAX_UPLOAD_SIZE_MB", env_or_default("MAX_UPLOAD_SIZE_MB", "50"))?;
        let page_budget_seconds =
            parse_u64("RASTER_PAGE_BUDGET_SECONDS", env_or_default("RASTER_PAGE_BUDGET_SECONDS", "30"))?;

        let lock_default_ttl = parse_u64(
            "LOCK_DEFAULT_TTL_SECONDS",
            env_or_default("LOCK_DEFAULT_TTL_SECONDS", "600"),
        )?;
        let lock_max_ttl =
            parse_u64("LOCK_MAX_TTL_SECONDS", env_or_default("LOCK_MAX_TTL_SECONDS", "3600"))?;
        let lock_rate_limit = parse_u64(
            "LOCK_ACQUIRE_RATE_LIMIT_PER_MINUTE",
            env_or_default("LOCK_ACQUIRE_RATE_LIMIT_PER_MINUTE", "60"),
        )?;

        let cloud_base_url = env_or_default("CLOUD_OCR_BASE_URL", "");
        let cloud_api_key = env_or_default("CLOUD_OCR_API_KEY", "");
        let cloud_timeout_seconds =
            parse_u64("CLOUD_OCR_TIMEOUT_SECONDS", env_or_default("CLOUD_OCR_TIMEOUT_SECONDS", "30"))?;
        let breaker_failure_threshold = parse_u32(
            "CLOUD_OCR_BREAKER_FAILURES",
            env_or_default("CLOUD_OCR_BREAKER_FAILURES", "5"),
        )?;
        let breaker_cooldown_seconds = parse_u64(
            "CLOUD_OCR_BREAKER_COOLDOWN_SECONDS",
            env_or_default("CLOUD_OCR_BREAKER_COOLDOWN_SECONDS", "120"),
        )?;
        let threshold_strict =
            parse_f64("OCR_THRESHOLD_STRICT", env_or_default("OCR_THRESHOLD_STRICT", "0.85"))?;
        let match_threshold =
            parse_f64("MATCH_THRESHOLD", env_or_default("MATCH_THRESHOLD", "0.75"))?;
        let match_margin = parse_f64("MATCH_MARGIN", env_or_default("MATCH_MARGIN", "0.15"))?;

        let staging_threshold_minutes = parse_u64(
            "STAGING_THRESHOLD_MINUTES",
            env_or_default("STAGING_THRESHOLD_MINUTES", "60"),
        )?;
        let locked_threshold_minutes = parse_u64(
            "LOCKED_THRESHOLD_MINUTES",
            env_or_default("LOCKED_THRESHOLD_MINUTES", "120"),
        )?;
        let draft_ttl_hours =
            parse_u64("DRAFT_TTL_HOURS", env_or_default("DRAFT_TTL_HOURS", "24"))?;

        let first_superuser_username = env_or_default("FIRST_SUPERUSER_USERNAME", "admin");
        let first_superuser_password = env_or_default("FIRST_SUPERUSER_PASSWORD", "");

        let log_level = env_or_default("KORRIGO_LOG_LEVEL", "info");
        let json = env_optional("KORRIGO_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings { secret_key, access_token_expire_minutes, algorithm },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            s3: S3Settings {
                endpoint: s3_endpoint,
                access_key: s3_access_key,
                secret_key: s3_secret_key,
                bucket: s3_bucket,
                region: s3_region,
            },
            raster: RasterSettings {
                dpi: raster_dpi,
                pdftoppm_path,
                max_upload_size_mb,
                page_budget_seconds,
            },
            locks: LockSettings {
                default_ttl_seconds: lock_default_ttl,
                max_ttl_seconds: lock_max_ttl,
                acquire_rate_limit_per_minute: lock_rate_limit,
            },
            ocr: OcrSettings {
                cloud_base_url,
                cloud_api_key,
                cloud_timeout_seconds,
                breaker_failure_threshold,
                breaker_cooldown_seconds,
                threshold_strict,
                match_threshold,
                match_margin,
            },
            maintenance: MaintenanceSettings {
                staging_threshold_minutes,
                locked_threshold_minutes,
                draft_ttl_hours,
            },
            admin: AdminSettings { first_superuser_username, first_superuser_password },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn s3(&self) -> &S3Settings {
        &self.s3
    }

    pub(crate) fn raster(&self) -> &RasterSettings {
        &self.raster
    }

    pub(crate) fn locks(&self) -> &LockSettings {
        &self.locks
    }

    pub(crate) fn ocr(&self) -> &OcrSettings {
        &self.ocr
    }

    pub(crate) fn maintenance(&self) -> &MaintenanceSettings {
        &self.maintenance
    }

    pub(crate) fn admin(&self) -> &AdminSettings {
        &self.admin
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.raster.dpi == 0 || self.raster.dpi > 600 {
            return Err(ConfigError::InvalidValue {
                field: "RASTER_DPI",
                value: self.raster.dpi.to_string(),
            });
        }

        if self.locks.max_ttl_seconds == 0 || self.locks.max_ttl_seconds > 86_400 {
            return Err(ConfigError::InvalidValue {
                field: "LOCK_MAX_TTL_SECONDS",
                value: self.locks.max_ttl_seconds.to_string(),
            });
        }

        if self.locks.default_ttl_seconds == 0
            || self.locks.default_ttl_seconds > self.locks.max_ttl_seconds
        {
            return Err(ConfigError::InvalidValue {
                field: "LOCK_DEFAULT_TTL_SECONDS",
                value: self.locks.default_ttl_seconds.to_string(),
            });
        }

        for (field, value) in [
            ("OCR_THRESHOLD_STRICT", self.ocr.threshold_strict),
            ("MATCH_THRESHOLD", self.ocr.match_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue { field, value: value.to_string() });
            }
        }

        if self.ocr.match_margin <= 0.0 || self.ocr.match_margin >= 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "MATCH_MARGIN",
                value: self.ocr.match_margin.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.s3.access_key.is_empty() || self.s3.secret_key.is_empty() {
            return Err(ConfigError::MissingSecret("S3_ACCESS_KEY/S3_SECRET_KEY"));
        }
        if self.admin.first_superuser_password.is_empty() {
            return Err(ConfigError::MissingSecret("FIRST_SUPERUSER_PASSWORD"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;

    #[tokio::test]
    async fn load_with_defaults() {
        let _guard = crate::test_support::env_lock().await;
        std::env::remove_var("KORRIGO_STRICT_CONFIG");
        std::env::set_var("KORRIGO_ENV", "test");
        std::env::set_var("SECRET_KEY", "test-secret");

        let settings = Settings::load().expect("settings");

        assert_eq!(settings.raster().dpi, 150);
        assert_eq!(settings.locks().max_ttl_seconds, 3600);
        assert!(settings.ocr().match_margin > 0.0);
    }
}
