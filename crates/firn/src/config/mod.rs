//! Sink configuration.
//!
//! Configuration arrives as a flat string property map from the embedding
//! runtime. Optional YAML profile files (`connect.s3.config.profiles`) are
//! merged first, in listing order; native properties win on conflict.
//! Every `connect.s3.*` key has a deprecated `aws.*` alias that is honored
//! with a warning.

pub mod kcql;

pub use kcql::KcqlStatement;

use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use firn_common::{S3ClientSettings, S3Credentials};

use crate::error::{
    ConfigError, DuplicateTopicSnafu, InvalidPropertySnafu, MissingPropertySnafu,
    ProfileParseSnafu, ProfileReadSnafu,
};
use crate::format::Format;
use crate::naming::{ObjectKeyBuilder, ObjectNaming, PartitionDisplay};
use crate::partition::{PartitionField, PartitionKeyBuilder};
use crate::policy::CommitPolicy;
use crate::staging::WriteMode;

pub const KCQL: &str = "connect.s3.kcql";
pub const AWS_ACCESS_KEY: &str = "connect.s3.aws.access.key";
pub const AWS_SECRET_KEY: &str = "connect.s3.aws.secret.key";
pub const AUTH_MODE: &str = "connect.s3.aws.auth.mode";
pub const CUSTOM_ENDPOINT: &str = "connect.s3.custom.endpoint";
pub const VHOST_BUCKET: &str = "connect.s3.vhost.bucket";
pub const WRITE_MODE: &str = "connect.s3.write.mode";
pub const LOCAL_TMP_DIRECTORY: &str = "connect.s3.local.tmp.directory";
pub const ERROR_POLICY: &str = "connect.s3.error.policy";
pub const ERROR_RETRY_INTERVAL: &str = "connect.s3.error.retry.interval";
pub const MAX_RETRIES: &str = "connect.s3.max.retries";
pub const CONFIG_PROFILES: &str = "connect.s3.config.profiles";

const DEPRECATED_PREFIX: &str = "aws.";
const CURRENT_PREFIX: &str = "connect.s3.";

/// What to do when a put fails against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Fail the task.
    #[default]
    Throw,
    /// Log and swallow; open files stay buffered for the next attempt.
    Noop,
    /// Surface a retriable error so the runtime backs off and redelivers.
    Retry,
}

impl ErrorPolicy {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_uppercase().as_str() {
            "THROW" => Ok(ErrorPolicy::Throw),
            "NOOP" => Ok(ErrorPolicy::Noop),
            "RETRY" => Ok(ErrorPolicy::Retry),
            _ => InvalidPropertySnafu {
                key: ERROR_POLICY,
                value,
            }
            .fail(),
        }
    }
}

/// One topic -> bucket/prefix binding from a KCQL statement.
#[derive(Debug, Clone)]
pub struct SinkBinding {
    pub topic: String,
    pub bucket: String,
    pub prefix: String,
    pub format: Format,
    pub partition_by: Vec<PartitionField>,
    pub partitioner: PartitionDisplay,
    pub naming: ObjectNaming,
    pub policy: CommitPolicy,
}

impl SinkBinding {
    fn from_statement(statement: KcqlStatement) -> Self {
        let naming = if statement.partition_by.is_empty() {
            ObjectNaming::Hierarchical
        } else {
            ObjectNaming::Partitioned
        };
        let policy = if statement.flush_count.is_none()
            && statement.flush_size.is_none()
            && statement.flush_interval_secs.is_none()
        {
            CommitPolicy::default()
        } else {
            CommitPolicy::new(
                statement.flush_count,
                statement.flush_size,
                statement.flush_interval_secs.map(Duration::from_secs),
            )
        };
        Self {
            topic: statement.topic,
            bucket: statement.bucket,
            prefix: statement.prefix,
            format: statement.format,
            partition_by: statement.partition_by,
            partitioner: statement.partitioner,
            naming,
            policy,
        }
    }

    pub fn key_builder(&self) -> ObjectKeyBuilder {
        ObjectKeyBuilder::new(self.naming, self.partitioner, &*self.prefix, self.format)
    }

    pub fn partition_key_builder(&self) -> PartitionKeyBuilder {
        PartitionKeyBuilder::new(self.partition_by.clone())
    }
}

/// Fully parsed and validated sink configuration.
#[derive(Debug, Clone)]
pub struct S3SinkConfig {
    pub bindings: Vec<SinkBinding>,
    pub client: S3ClientSettings,
    pub write_mode: WriteMode,
    pub tmp_dir: PathBuf,
    pub error_policy: ErrorPolicy,
    pub retry_interval: Duration,
    pub max_retries: u32,
}

impl S3SinkConfig {
    pub fn from_props(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let props = Props::resolve(props)?;

        let kcql = props.required(KCQL)?;
        let statements = kcql::parse(&kcql)?;
        let mut topics = HashSet::new();
        for statement in &statements {
            ensure!(
                topics.insert(statement.topic.clone()),
                DuplicateTopicSnafu {
                    topic: statement.topic.clone(),
                }
            );
        }
        let bindings = statements
            .into_iter()
            .map(SinkBinding::from_statement)
            .collect();

        let credentials = match props.get(AUTH_MODE).as_deref() {
            None | Some("Default") | Some("default") => S3Credentials::Default,
            Some("Credentials") | Some("credentials") => S3Credentials::Keys {
                access_key: props.required(AWS_ACCESS_KEY)?,
                secret_key: props.required(AWS_SECRET_KEY)?,
            },
            Some(other) => {
                return InvalidPropertySnafu {
                    key: AUTH_MODE,
                    value: other,
                }
                .fail()
            }
        };
        let client = S3ClientSettings {
            credentials,
            region: None,
            endpoint: props.get(CUSTOM_ENDPOINT),
            virtual_host_bucket: props.bool(VHOST_BUCKET)?.unwrap_or(false),
        };

        let write_mode = match props.get(WRITE_MODE).as_deref() {
            None => WriteMode::default(),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "streamed" => WriteMode::Streamed,
                "buildlocal" => WriteMode::BuildLocal,
                _ => {
                    return InvalidPropertySnafu {
                        key: WRITE_MODE,
                        value,
                    }
                    .fail()
                }
            },
        };
        let tmp_dir = props
            .get(LOCAL_TMP_DIRECTORY)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("firn-staging"));

        let error_policy = match props.get(ERROR_POLICY) {
            None => ErrorPolicy::default(),
            Some(value) => ErrorPolicy::parse(&value)?,
        };
        let retry_interval = Duration::from_millis(
            props.u64(ERROR_RETRY_INTERVAL)?.unwrap_or(60_000),
        );
        let max_retries = props.u64(MAX_RETRIES)?.unwrap_or(20) as u32;

        Ok(Self {
            bindings,
            client,
            write_mode,
            tmp_dir,
            error_policy,
            retry_interval,
            max_retries,
        })
    }
}

/// Property lookup over the merged profile + native maps, with deprecated
/// alias handling.
struct Props {
    merged: HashMap<String, String>,
}

impl Props {
    /// Load profiles (if any) and overlay the native properties.
    fn resolve(native: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut merged = HashMap::new();

        let profiles = lookup(native, CONFIG_PROFILES);
        if let Some(profiles) = profiles {
            for path in profiles.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let path = PathBuf::from(path);
                let contents = std::fs::read_to_string(&path)
                    .context(ProfileReadSnafu { path: path.clone() })?;
                let values: HashMap<String, serde_yaml::Value> =
                    serde_yaml::from_str(&contents)
                        .context(ProfileParseSnafu { path: path.clone() })?;
                for (key, value) in values {
                    let rendered = match value {
                        serde_yaml::Value::String(s) => s,
                        serde_yaml::Value::Number(n) => n.to_string(),
                        serde_yaml::Value::Bool(b) => b.to_string(),
                        _ => {
                            return InvalidPropertySnafu {
                                key,
                                value: "<non-scalar>",
                            }
                            .fail()
                        }
                    };
                    merged.insert(key, rendered);
                }
            }
        }

        // Native properties win over anything a profile set
        for (key, value) in native {
            merged.insert(key.clone(), value.clone());
        }

        Ok(Self { merged })
    }

    fn get(&self, key: &str) -> Option<String> {
        lookup(&self.merged, key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).context(MissingPropertySnafu { key })
    }

    fn bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .ok()
                .context(InvalidPropertySnafu { key, value }),
        }
    }

    fn u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .ok()
                .context(InvalidPropertySnafu { key, value }),
        }
    }
}

/// Look up a key, falling back to its deprecated `aws.*` alias.
fn lookup(map: &HashMap<String, String>, key: &str) -> Option<String> {
    if let Some(value) = map.get(key) {
        return Some(value.clone());
    }
    let alias = key.replacen(CURRENT_PREFIX, DEPRECATED_PREFIX, 1);
    if let Some(value) = map.get(&alias) {
        warn!(
            deprecated = %alias,
            replacement = %key,
            "Deprecated property name; please migrate"
        );
        return Some(value.clone());
    }
    None
}
