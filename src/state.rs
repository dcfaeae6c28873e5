//! Application state
//!
//! Configuration and the shared components handed to handlers

use crate::detection_service::DetectionService;
use crate::detector_client::{DetectorClient, DetectorConfig, DirtyVocabulary, DEFAULT_CONF_THRESHOLD};
use crate::error::{Error, Result};
use crate::event_store::EventStore;
use crate::monitor_loop::{MonitorConfig, MonitorStats, NotifyPolicy};
use crate::notification_service::{
    EmailApiConfig, Notifier, NotifierConfig, SmtpConfig, WhatsAppConfig,
};
use crate::registry::Registry;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Upper bound for interval and timeout settings (one week)
const MAX_SECS: u64 = 7 * 24 * 60 * 60;

/// Typed reads over a key lookup; bad values fall back with a warning
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty trimmed value
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(key = key, value = %raw, default = %default, "Invalid config value, using default");
                default
            }),
            None => default,
        }
    }

    /// Whole seconds in `1..=MAX_SECS`
    fn secs_or(&self, key: &str, default: u64) -> Duration {
        let secs = self.parse_or(key, default);
        if (1..=MAX_SECS).contains(&secs) {
            return Duration::from_secs(secs);
        }
        tracing::warn!(
            key = key,
            value = secs,
            max = MAX_SECS,
            default = default,
            "Duration out of range, using default"
        );
        Duration::from_secs(default)
    }

    fn flag(&self, key: &str) -> bool {
        matches!(
            self.string(key).map(|v| v.to_ascii_lowercase()).as_deref(),
            Some("1" | "true" | "yes" | "on")
        )
    }
}

/// Where the database lives
#[derive(Clone)]
pub enum DatabaseConfig {
    Url(String),
    Parts {
        host: String,
        port: u16,
        user: String,
        password: Option<String>,
        database: String,
    },
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<MySqlConnectOptions> {
        match self {
            DatabaseConfig::Url(url) => MySqlConnectOptions::from_str(url)
                .map_err(|e| Error::Config(format!("invalid DATABASE_URL: {}", e))),
            DatabaseConfig::Parts {
                host,
                port,
                user,
                password,
                database,
            } => {
                let mut opts = MySqlConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .username(user)
                    .database(database);
                if let Some(password) = password {
                    opts = opts.password(password);
                }
                Ok(opts)
            }
        }
    }
}

/// Credentials stay out of logs
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseConfig::Url(url) => {
                let shown = match (url.split_once("://"), url.rsplit_once('@')) {
                    (Some((scheme, _)), Some((_, host))) => format!("{}://***@{}", scheme, host),
                    _ => url.clone(),
                };
                write!(f, "{}", shown)
            }
            DatabaseConfig::Parts {
                host,
                port,
                user,
                database,
                ..
            } => write!(f, "mysql://{}@{}:{}/{}", user, host, port, database),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// `None` runs the service without storage
    pub database: Option<DatabaseConfig>,
    pub db_max_connections: u32,
    /// ENABLE_MONITOR
    pub enable_monitor: bool,
    pub monitor: MonitorConfig,
    pub detector: DetectorConfig,
    pub notifier: NotifierConfig,
    /// Mirror directory for event images
    pub event_image_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let database = match env.string("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig::Url(url)),
            None => match (env.string("DB_HOST"), env.string("DB_USER"), env.string("DB_NAME")) {
                (Some(host), Some(user), Some(database)) => Some(DatabaseConfig::Parts {
                    host,
                    port: env.parse_or("DB_PORT", 3306),
                    user,
                    password: env.string("DB_PASSWORD"),
                    database,
                }),
                _ => None,
            },
        };

        let policy = match env.string("NOTIFY_POLICY") {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "Invalid NOTIFY_POLICY, using on_detection");
                NotifyPolicy::OnDetection
            }),
            None => NotifyPolicy::OnDetection,
        };

        let detect_timeout = env.secs_or("DETECT_TIMEOUT", 30);

        let monitor = MonitorConfig {
            poll_interval: env.secs_or("POLL_INTERVAL", 5),
            notify_interval: env.secs_or("NOTIFY_INTERVAL", 60),
            registry_backoff: env.secs_or("REGISTRY_BACKOFF", 5),
            capture_timeout: env.secs_or("CAPTURE_TIMEOUT", 15),
            detect_timeout,
            policy,
        };

        let mut threshold = env.parse_or("CONF_THRESHOLD", DEFAULT_CONF_THRESHOLD);
        if !(0.0..=1.0).contains(&threshold) {
            tracing::warn!(threshold = threshold, "CONF_THRESHOLD outside 0..1, using default");
            threshold = DEFAULT_CONF_THRESHOLD;
        }

        let detector = DetectorConfig {
            service_url: env.string("YOLO_SERVICE_URL"),
            threshold,
            vocabulary: DirtyVocabulary::from_csv(&env.string_or("DIRTY_LABELS", "dirty,kotor")),
            timeout: detect_timeout,
        };

        let smtp = env.string("SMTP_HOST").map(|host| {
            let username = env.string("SMTP_USER");
            SmtpConfig {
                host,
                starttls_port: env.parse_or("SMTP_PORT", 587),
                tls_port: env.parse_or("SMTP_SSL_PORT", 465),
                from: env
                    .string("SMTP_FROM_EMAIL")
                    .or_else(|| username.clone())
                    .unwrap_or_else(|| "flooreye@localhost".to_string()),
                username,
                password: env.string("SMTP_PASSWORD"),
                timeout: Duration::from_secs(20),
            }
        });

        let email_api = match (env.string("EMAIL_API_URL"), env.string("EMAIL_API_KEY")) {
            (Some(url), Some(api_key)) => Some(EmailApiConfig {
                url,
                api_key,
                from: env.string_or("EMAIL_API_FROM", "flooreye@localhost"),
            }),
            _ => None,
        };

        let whatsapp = match (env.string("WHATSAPP_API_URL"), env.string("WHATSAPP_API_TOKEN")) {
            (Some(url), Some(token)) => Some(WhatsAppConfig { url, token }),
            _ => None,
        };

        Self {
            host: env.string_or("HOST", "0.0.0.0"),
            port: env.parse_or("PORT", 8000),
            database,
            db_max_connections: env.parse_or("DB_MAX_CONNECTIONS", 5),
            enable_monitor: env.flag("ENABLE_MONITOR"),
            monitor,
            detector,
            notifier: NotifierConfig {
                smtp,
                email_api,
                whatsapp,
                timeout: Duration::from_secs(15),
            },
            event_image_dir: env.string("EVENT_IMAGE_DIR").map(PathBuf::from),
        }
    }
}

/// Components that exist only with a database
#[derive(Clone)]
pub struct Storage {
    pub pool: MySqlPool,
    pub registry: Arc<Registry>,
    pub events: Arc<EventStore>,
}

impl Storage {
    pub fn new(pool: MySqlPool, image_dir: Option<PathBuf>) -> Self {
        Self {
            registry: Arc::new(Registry::new(pool.clone())),
            events: Arc::new(EventStore::new(pool.clone(), image_dir)),
            pool,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: Arc<AppConfig>,
    /// Database-backed components
    pub storage: Option<Storage>,
    /// Remote detector
    pub detector: Option<Arc<DetectorClient>>,
    /// Manual pipeline (detector + storage)
    pub detection: Option<Arc<DetectionService>>,
    pub notifier: Arc<Notifier>,
    /// Published by the monitor loop
    pub monitor_stats: Arc<RwLock<MonitorStats>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, pool: Option<MySqlPool>) -> Result<Self> {
        let storage = pool.map(|pool| Storage::new(pool, config.event_image_dir.clone()));
        let detector = DetectorClient::from_config(&config.detector)?.map(Arc::new);
        let notifier = Arc::new(Notifier::new(config.notifier.clone())?);

        let detection = match (&detector, &storage) {
            (Some(detector), Some(storage)) => Some(Arc::new(DetectionService::new(
                detector.clone(),
                storage.events.clone(),
                storage.registry.clone(),
                notifier.clone(),
            ))),
            _ => None,
        };

        Ok(Self {
            config: Arc::new(config),
            storage,
            detector,
            detection,
            notifier,
            monitor_stats: Arc::new(RwLock::new(MonitorStats::default())),
            started_at: Instant::now(),
        })
    }

    pub fn storage(&self) -> Result<&Storage> {
        self.storage
            .as_ref()
            .ok_or_else(|| Error::StorageUnavailable("database is not configured".to_string()))
    }

    pub fn registry(&self) -> Result<&Registry> {
        Ok(self.storage()?.registry.as_ref())
    }

    pub fn events(&self) -> Result<&EventStore> {
        Ok(self.storage()?.events.as_ref())
    }

    /// Manual pipeline, or the reason it is unavailable
    pub fn detection(&self) -> Result<&DetectionService> {
        if self.detector.is_none() {
            return Err(Error::DetectorUnavailable(
                "YOLO_SERVICE_URL is not configured".to_string(),
            ));
        }
        self.detection
            .as_deref()
            .ok_or_else(|| Error::StorageUnavailable("database is not configured".to_string()))
    }
}
