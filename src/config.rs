use std::{
    collections::BTreeMap,
    env,
    fs::File,
    io,
    path::{Path, PathBuf},
    time,
};

use serde::Deserialize;
use tracing::debug;

const DEFAULT_API_URL: &str = "https://api.airtable.com/v0/";
const DEFAULT_RETRY_WAIT_MIN: time::Duration = time::Duration::from_secs(30);
const DEFAULT_RETRY_WAIT_MAX: time::Duration = time::Duration::from_secs(60);
const DEFAULT_RETRY_ATTEMPTS: u32 = 4;

/// An error encountered while loading or resolving a configuration profile.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The config file could not be read.
    #[error("Failed to load config file")]
    Io(#[from] io::Error),
    /// The config file is not valid YAML, or has the wrong shape.
    #[error("Invalid configuration")]
    Invalid(#[from] serde_yaml::Error),
    /// The named profile is missing from the config file.
    #[error("Profile '{0}' not found")]
    ProfileNotFound(String),
    /// The API key is not ASCII, so it can't be sent in a header.
    #[error("API key contains invalid characters")]
    InvalidApiKey,
    /// Neither the profile nor the environment provides an API key.
    #[error("No API key found")]
    NoApiKey,
    /// Neither the profile nor the environment provides a base ID.
    #[error("No base found")]
    NoBase,
    /// The API URL could not be parsed.
    #[error("Invalid API URL")]
    InvalidUrl(#[from] url::ParseError),
}

/// Governs how rate-limited (HTTP 429) requests are retried.
///
/// Retry `n` (counting from zero) waits `wait_min * 2^n`, capped at
/// `wait_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The wait before the first retry.
    pub wait_min: time::Duration,
    /// The upper bound on any single wait.
    pub wait_max: time::Duration,
    /// The number of retries after the first attempt.
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            wait_min: DEFAULT_RETRY_WAIT_MIN,
            wait_max: DEFAULT_RETRY_WAIT_MAX,
            attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            attempts: 0,
            ..Default::default()
        }
    }

    /// The wait before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> time::Duration {
        let factor = 2u32.saturating_pow(retry);
        self.wait_min
            .checked_mul(factor)
            .unwrap_or(self.wait_max)
            .min(self.wait_max)
    }
}

/// A fully resolved configuration profile for talking to Airtable.
#[derive(Clone)]
pub struct Profile {
    /// The name of the profile.
    pub name: String,
    /// The API root. Always ends in a slash.
    pub api_url: url::Url,
    /// The personal access token (or legacy API key) used for authentication.
    pub api_key: String,
    /// The base (`app...`) that requests are addressed to.
    pub base: String,
    /// How rate-limited requests are retried.
    pub retry: RetryPolicy,
    /// The user-agent used on requests.
    pub user_agent: String,
    /// The config file this profile was loaded from, if any.
    pub config_path: Option<PathBuf>,
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("api_url", &self.api_url.as_str())
            .field("api_key", &"********")
            .field("base", &self.base)
            .field("retry", &self.retry)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// A profile stored in the config file.
#[derive(Debug, Default, Clone, Deserialize)]
struct ConfigProfile {
    pub(crate) api_url: Option<String>,
    pub(crate) api_key: Option<String>,
    pub(crate) base: Option<String>,
    pub(crate) retry_wait_min_secs: Option<u64>,
    pub(crate) retry_wait_max_secs: Option<u64>,
    pub(crate) retry_attempts: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct Config {
    profiles: BTreeMap<String, ConfigProfile>,
}

impl Profile {
    /// Build a profile for the given base and key, using the public API
    /// endpoint and the default retry policy. Neither value is validated;
    /// mistakes surface when the first request is made.
    pub fn new(base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: "default".to_owned(),
            api_url: default_api_url(),
            api_key: api_key.into(),
            base: base.into(),
            retry: RetryPolicy::default(),
            user_agent: make_ua(None),
            config_path: None,
        }
    }

    /// Replace the API root, e.g. to point at a proxy or a test server.
    pub fn with_api_url(self, api_url: &str) -> Result<Self, Error> {
        Ok(Self {
            api_url: parse_api_url(api_url)?,
            ..self
        })
    }

    /// Replace the retry policy.
    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    /// Modifies the user-agent to have a different prefix.
    pub fn with_ua_product(self, ua_product: &str) -> Self {
        Self {
            user_agent: make_ua(Some(ua_product)),
            ..self
        }
    }

    /// Load a profile from the Airtable configuration file (usually
    /// ~/.config/airtable.yaml), with overrides from the environment. If no
    /// configuration file is present, the profile is built solely from the
    /// environment.
    ///
    /// If `AIRTABLE_PROFILE` is set, that will be used to select the profile.
    /// Otherwise the profile `default` will be used.
    ///
    /// | Environment Variable | Config Value |
    /// |----------------------|--------------|
    /// | `AIRTABLE_KEY`       | `api_key`    |
    /// | `AIRTABLE_BASE`      | `base`       |
    /// | `AIRTABLE_API_URL`   | `api_url`    |
    pub fn from_default_env() -> Result<Self, Error> {
        if let Ok(s) = env::var("AIRTABLE_PROFILE") {
            Self::from_env(&s)
        } else {
            Self::from_env("default")
        }
    }

    /// Load the named profile from the Airtable configuration file, with
    /// overrides from the environment. See [Profile::from_default_env].
    pub fn from_env(name: &str) -> Result<Self, Error> {
        let overrides = ConfigProfile {
            api_key: env::var("AIRTABLE_KEY").ok(),
            base: env::var("AIRTABLE_BASE").ok(),
            api_url: env::var("AIRTABLE_API_URL").ok(),
            ..Default::default()
        };

        let config_path = find_config();
        let file_profile = match config_path.as_deref().map(|p| read_profile(p, name)) {
            Some(Ok(p)) => p,
            Some(Err(Error::Io(e))) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no config file found");
                Default::default()
            }
            Some(Err(Error::ProfileNotFound(_))) if overrides.api_key.is_some() => {
                debug!(profile = name, "profile not in config file, using environment");
                Default::default()
            }
            Some(Err(e)) => return Err(e),
            None => Default::default(),
        };

        let merged = ConfigProfile {
            api_url: overrides.api_url.or(file_profile.api_url),
            api_key: overrides.api_key.or(file_profile.api_key),
            base: overrides.base.or(file_profile.base),
            ..file_profile
        };

        Self::from_raw(merged, name.to_owned(), config_path.filter(|p| p.exists()))
    }

    /// Load the given profile (or 'default') from the given file, which must
    /// be a valid Airtable configuration file. Does not read any environment
    /// variables.
    pub fn read(path: impl AsRef<Path>, name: Option<&str>) -> Result<Self, Error> {
        let path = path.as_ref();
        let name = name.unwrap_or("default").to_owned();
        let profile = read_profile(path, &name)?;
        Self::from_raw(profile, name, Some(path.to_owned()))
    }

    fn from_raw(raw: ConfigProfile, name: String, path: Option<PathBuf>) -> Result<Self, Error> {
        let ConfigProfile {
            api_url,
            api_key,
            base,
            retry_wait_min_secs,
            retry_wait_max_secs,
            retry_attempts,
        } = raw;

        let api_url = match api_url {
            Some(s) => parse_api_url(&s)?,
            None => default_api_url(),
        };

        let api_key = api_key.ok_or(Error::NoApiKey)?;
        if !api_key.is_ascii() {
            return Err(Error::InvalidApiKey);
        }

        let base = base.ok_or(Error::NoBase)?;

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            wait_min: retry_wait_min_secs
                .map(time::Duration::from_secs)
                .unwrap_or(defaults.wait_min),
            wait_max: retry_wait_max_secs
                .map(time::Duration::from_secs)
                .unwrap_or(defaults.wait_max),
            attempts: retry_attempts.unwrap_or(defaults.attempts),
        };

        Ok(Self {
            name,
            api_url,
            api_key,
            base,
            retry,
            user_agent: make_ua(None),
            config_path: path,
        })
    }
}

fn default_api_url() -> url::Url {
    url::Url::parse(DEFAULT_API_URL).expect("default API URL is valid")
}

// Joining relative paths onto a URL without a trailing slash would replace
// the last segment ("v0").
fn parse_api_url(s: &str) -> Result<url::Url, Error> {
    if s.ends_with('/') {
        Ok(url::Url::parse(s)?)
    } else {
        Ok(url::Url::parse(&format!("{s}/"))?)
    }
}

fn find_config() -> Option<PathBuf> {
    let home = env::home_dir()?;

    let canonical = home.join(".config/airtable.yaml");
    if canonical.exists() {
        return Some(canonical);
    }

    for fallback in [".config/airtable.yml", ".airtable/config.yaml"] {
        let path = home.join(fallback);
        if path.exists() {
            return Some(path);
        }
    }

    Some(canonical)
}

fn read_profile(p: &Path, name: &str) -> Result<ConfigProfile, Error> {
    let file = File::open(p)?;
    let mut config: Config = serde_yaml::from_reader(file).map_err(Error::Invalid)?;
    let Some(config_profile) = config.profiles.remove(name) else {
        return Err(Error::ProfileNotFound(name.to_string()));
    };

    debug!(path = %p.display(), "loaded config file");

    Ok(config_profile)
}

fn make_ua(product: Option<&str>) -> String {
    format!(
        "{}/{}",
        product.unwrap_or("airtable-rs"),
        env!("CARGO_PKG_VERSION")
    )
}
