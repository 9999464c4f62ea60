use std::{env::var, num::ParseIntError, time::Duration};

use thiserror::Error;

pub const PRODUCT_VERSION: &str = "2.9";

pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 300;

/// Container images of every platform component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentImages {
    pub apicast: String,
    pub backend: String,
    pub system: String,
    pub zync: String,
    pub memcached: String,
    pub backend_redis: String,
    pub system_redis: String,
    pub system_mysql: String,
    pub system_postgresql: String,
    pub zync_postgresql: String,
}

impl Default for ComponentImages {
    fn default() -> Self {
        Self {
            apicast: "quay.io/3scale/apicast:3scale-2.9.0".to_owned(),
            backend: "quay.io/3scale/apisonator:3scale-2.9.0".to_owned(),
            system: "quay.io/3scale/porta:3scale-2.9.0".to_owned(),
            zync: "quay.io/3scale/zync:3scale-2.9.0".to_owned(),
            memcached: "memcached:1.5".to_owned(),
            backend_redis: "centos/redis-32-centos7".to_owned(),
            system_redis: "centos/redis-32-centos7".to_owned(),
            system_mysql: "centos/mysql-57-centos7".to_owned(),
            system_postgresql: "centos/postgresql-10-centos7".to_owned(),
            zync_postgresql: "centos/postgresql-10-centos7".to_owned(),
        }
    }
}

/// Settings of the operator process itself.
#[derive(Debug, Clone)]
pub struct OperatorRelease {
    /// watch a single namespace, every namespace when unset
    pub watch_namespace: Option<String>,
    pub version: String,
    pub product_version: String,
    pub images: ComponentImages,
    pub reconcile_timeout: Duration,
    pub resync_period: Duration,
}

#[derive(Debug, Error)]
pub enum FromError {
    #[error("Env var {} couldn't be parsed as a number of seconds! Reason: {}", .0, .1)]
    InvalidSeconds(&'static str, ParseIntError),
    #[error("Env var {} must not be empty!", .0)]
    EmptyValue(&'static str),
}

impl Default for OperatorRelease {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            version: env!("CARGO_PKG_VERSION").to_owned(),
            product_version: PRODUCT_VERSION.to_owned(),
            images: ComponentImages::default(),
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
            resync_period: Duration::from_secs(DEFAULT_RESYNC_PERIOD_SECS),
        }
    }
}

impl OperatorRelease {
    pub fn from_env() -> Result<Self, FromError> {
        Self::from_lookup(|name| var(name).ok())
    }

    /// Builds the release from any variable source, unset variables fall
    /// back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FromError> {
        let defaults = Self::default();
        let image = |name: &'static str, default: String| -> Result<String, FromError> {
            match lookup(name) {
                Some(value) if value.trim().is_empty() => Err(FromError::EmptyValue(name)),
                Some(value) => Ok(value),
                None => Ok(default),
            }
        };
        let seconds = |name: &'static str, default: Duration| -> Result<Duration, FromError> {
            match lookup(name) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Duration::from_secs)
                    .map_err(|error| FromError::InvalidSeconds(name, error)),
                None => Ok(default),
            }
        };
        let images = defaults.images;

        Ok(Self {
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|namespace| !namespace.is_empty()),
            version: lookup("THREESCALE_OPERATOR_VERSION").unwrap_or(defaults.version),
            product_version: defaults.product_version,
            images: ComponentImages {
                apicast: image("APICAST_IMAGE", images.apicast)?,
                backend: image("BACKEND_IMAGE", images.backend)?,
                system: image("SYSTEM_IMAGE", images.system)?,
                zync: image("ZYNC_IMAGE", images.zync)?,
                memcached: image("MEMCACHED_IMAGE", images.memcached)?,
                backend_redis: image("BACKEND_REDIS_IMAGE", images.backend_redis)?,
                system_redis: image("SYSTEM_REDIS_IMAGE", images.system_redis)?,
                system_mysql: image("SYSTEM_MYSQL_IMAGE", images.system_mysql)?,
                system_postgresql: image("SYSTEM_POSTGRESQL_IMAGE", images.system_postgresql)?,
                zync_postgresql: image("ZYNC_POSTGRESQL_IMAGE", images.zync_postgresql)?,
            },
            reconcile_timeout: seconds("RECONCILE_TIMEOUT_SECS", defaults.reconcile_timeout)?,
            resync_period: seconds("RESYNC_PERIOD_SECS", defaults.resync_period)?,
        })
    }
}
