//! Configuration of a composition repository.
//!
//! Two values shape the storage core: the chunk bit width (slots per chunk, see
//! [`IdSchema`]) and the class index hash bit width (raw table size, see
//! [`ClassIndex`]). Both can be overridden per repository through environment
//! variables:
//!
//! ```text
//! RUSTY_POOL_<NAME>_CHUNK_BIT        RUSTY_POOL_CHUNK_BIT
//! RUSTY_POOL_<NAME>_CLASS_INDEX_BIT  RUSTY_POOL_CLASS_INDEX_BIT
//! ```
//!
//! where `<NAME>` is the upper-cased repository name with `-` and `.` replaced by `_`.
//! The scoped variable wins over the shared one.

use std::{
    any::TypeId,
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{error::ConfigError, index::ClassIndex, pool::IdSchema};

/// Longest repository name kept after normalization.
pub const NAME_MAX_LENGTH: usize = 48;

const ENV_PREFIX: &str = "RUSTY_POOL";
const CHUNK_BIT_KEY: &str = "CHUNK_BIT";
const CLASS_INDEX_BIT_KEY: &str = "CLASS_INDEX_BIT";

static UNNAMED: AtomicU32 = AtomicU32::new(1);

/// Where a configured value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Default,
    Explicit,
    /// An environment variable, by name.
    Env(String),
}

/// Storage core configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    name: String,
    chunk_bit: u32,
    chunk_bit_source: Source,
    class_index_bit: u32,
    class_index_bit_source: Source,
}

impl Config {
    /// Defaults for a repository. The name is normalized with [`normalize_name`].
    pub fn new(name: &str) -> Self {
        Self {
            name: normalize_name(name),
            chunk_bit: IdSchema::DEFAULT_CHUNK_BIT,
            chunk_bit_source: Source::Default,
            class_index_bit: ClassIndex::<TypeId>::DEFAULT_HASH_BITS,
            class_index_bit_source: Source::Default,
        }
    }

    /// Defaults overridden by the process environment.
    pub fn from_env(name: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(name, |key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the variable names.
    pub fn from_lookup<F>(name: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(name);
        if let Some((value, source)) = config.fetch(CHUNK_BIT_KEY, &lookup)? {
            config.chunk_bit = value;
            config.chunk_bit_source = source;
        }
        if let Some((value, source)) = config.fetch(CLASS_INDEX_BIT_KEY, &lookup)? {
            config.class_index_bit = value;
            config.class_index_bit_source = source;
        }
        Ok(config)
    }

    fn fetch<F>(&self, key: &str, lookup: &F) -> Result<Option<(u32, Source)>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for var in [self.env_var(key), format!("{ENV_PREFIX}_{key}")] {
            if let Some(raw) = lookup(&var) {
                let value = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: var.clone(),
                    value: raw.clone(),
                })?;
                return Ok(Some((value, Source::Env(var))));
            }
        }
        Ok(None)
    }

    /// The repository scoped environment variable for a setting.
    fn env_var(&self, key: &str) -> String {
        let scope: String = self
            .name
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{ENV_PREFIX}_{scope}_{key}")
    }

    pub fn with_chunk_bit(mut self, chunk_bit: u32) -> Self {
        self.chunk_bit = chunk_bit;
        self.chunk_bit_source = Source::Explicit;
        self
    }

    pub fn with_class_index_bit(mut self, class_index_bit: u32) -> Self {
        self.class_index_bit = class_index_bit;
        self.class_index_bit_source = Source::Explicit;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn chunk_bit(&self) -> u32 {
        self.chunk_bit
    }

    #[inline]
    pub fn class_index_bit(&self) -> u32 {
        self.class_index_bit
    }

    pub fn chunk_bit_source(&self) -> &Source {
        &self.chunk_bit_source
    }

    pub fn class_index_bit_source(&self) -> &Source {
        &self.class_index_bit_source
    }

    /// Check both bit widths against their supported ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.id_schema()?;
        let (min, max) = (
            ClassIndex::<TypeId>::MIN_HASH_BITS,
            ClassIndex::<TypeId>::MAX_HASH_BITS,
        );
        if !(min..=max).contains(&self.class_index_bit) {
            return Err(ConfigError::HashBitOutOfRange {
                bits: self.class_index_bit,
                min,
                max,
            });
        }
        Ok(())
    }

    pub fn id_schema(&self) -> Result<IdSchema, ConfigError> {
        IdSchema::new(self.chunk_bit)
    }

    pub fn class_index(&self) -> Result<ClassIndex, ConfigError> {
        ClassIndex::new(self.class_index_bit)
    }

    fn write_setting(
        &self,
        f: &mut fmt::Formatter<'_>,
        label: &str,
        value: u32,
        source: &Source,
        key: &str,
    ) -> fmt::Result {
        write!(f, "  {label}: {value}")?;
        match source {
            Source::Default => write!(f, " (set env '{}')", self.env_var(key)),
            Source::Explicit => Ok(()),
            Source::Env(var) => write!(f, " (from env '{var}')"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("")
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pool '{}'", self.name)?;
        self.write_setting(
            f,
            "chunk bit",
            self.chunk_bit,
            &self.chunk_bit_source,
            CHUNK_BIT_KEY,
        )?;
        writeln!(f)?;
        self.write_setting(
            f,
            "class index bit",
            self.class_index_bit,
            &self.class_index_bit_source,
            CLASS_INDEX_BIT_KEY,
        )
    }
}

/// Trim, lower-case and drop characters outside `[a-z0-9-_.]`, then cut to
/// [`NAME_MAX_LENGTH`]. An empty result becomes `pool-<n>`.
pub fn normalize_name(name: &str) -> String {
    let name: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .take(NAME_MAX_LENGTH)
        .collect();
    if name.is_empty() {
        format!("pool-{}", UNNAMED.fetch_add(1, Ordering::Relaxed))
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn name_is_normalized() {
        assert_eq!(normalize_name("  My World!  "), "myworld");
        assert_eq!(normalize_name("Level-1_a.b"), "level-1_a.b");
        assert_eq!(normalize_name(&"x".repeat(60)).len(), NAME_MAX_LENGTH);
    }

    #[test]
    fn empty_name_is_numbered() {
        // When
        let a = normalize_name("");
        let b = normalize_name(" ?! ");

        // Then
        assert!(a.starts_with("pool-"));
        assert!(b.starts_with("pool-"));
        assert_ne!(a, b);
    }

    #[test]
    fn defaults() {
        let config = Config::new("test");

        assert_eq!(config.chunk_bit(), 14);
        assert_eq!(config.class_index_bit(), 20);
        assert_eq!(config.chunk_bit_source(), &Source::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn scoped_env_wins_over_shared() {
        // Given
        let vars = lookup(&[
            ("RUSTY_POOL_MY_WORLD_CHUNK_BIT", "8"),
            ("RUSTY_POOL_CHUNK_BIT", "10"),
            ("RUSTY_POOL_CLASS_INDEX_BIT", "16"),
        ]);

        // When
        let config = Config::from_lookup("my-world", vars).unwrap();

        // Then
        assert_eq!(config.chunk_bit(), 8);
        assert_eq!(
            config.chunk_bit_source(),
            &Source::Env("RUSTY_POOL_MY_WORLD_CHUNK_BIT".to_string())
        );
        assert_eq!(config.class_index_bit(), 16);
        assert_eq!(
            config.class_index_bit_source(),
            &Source::Env("RUSTY_POOL_CLASS_INDEX_BIT".to_string())
        );
    }

    #[test]
    fn unparseable_env_is_an_error() {
        // Given
        let vars = lookup(&[("RUSTY_POOL_CHUNK_BIT", "lots")]);

        // When
        let result = Config::from_lookup("test", vars);

        // Then
        assert_eq!(
            result,
            Err(ConfigError::InvalidValue {
                key: "RUSTY_POOL_CHUNK_BIT".to_string(),
                value: "lots".to_string(),
            })
        );
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let config = Config::new("test").with_chunk_bit(20);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ChunkBitOutOfRange { bits: 20, .. })
        ));

        let config = Config::new("test").with_class_index_bit(30);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::HashBitOutOfRange { bits: 30, .. })
        ));
    }

    #[test]
    fn builds_core_objects() {
        // Given
        let config = Config::new("test").with_chunk_bit(4).with_class_index_bit(8);

        // When
        let schema = config.id_schema().unwrap();
        let index = config.class_index().unwrap();

        // Then
        assert_eq!(schema.chunk_capacity(), 16);
        assert_eq!(index.hash_bits(), 8);
    }

    #[test]
    fn summary_names_variables_for_defaults() {
        // Given
        let config = Config::new("demo").with_chunk_bit(6);

        // When
        let summary = config.to_string();

        // Then
        assert_eq!(
            summary,
            "Pool 'demo'\n  chunk bit: 6\n  class index bit: 20 (set env 'RUSTY_POOL_DEMO_CLASS_INDEX_BIT')"
        );
    }
}
