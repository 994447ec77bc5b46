//! Serializable build configuration and product file layout.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rollstitch_core::adjust::ContractSelection;
use rollstitch_core::domain::Product;
use rollstitch_core::roll::{BucketWidth, PersistenceRule};

/// Unique identifier for a build configuration (content hash).
pub type ConfigId = String;

/// Largest accepted spread window half-width: one leap year.
pub const MAX_SPREAD_WINDOW_MINUTES: i64 = 366 * 24 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Source bar resolution. Selects the preset bucket width, persistence rule
/// and spread window, and the file names of the product layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[default]
    Minute,
    Second,
}

impl Resolution {
    /// File-name tag (`1m` / `1s`).
    pub fn tag(self) -> &'static str {
        match self {
            Resolution::Minute => "1m",
            Resolution::Second => "1s",
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minute" | "1m" => Ok(Resolution::Minute),
            "second" | "1s" => Ok(Resolution::Second),
            other => Err(ConfigError::Invalid(format!("unknown resolution '{other}'"))),
        }
    }
}

/// Everything that determines the output of a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub product: Product,
    pub resolution: Resolution,
    pub bucket: BucketWidth,
    pub persistence: PersistenceRule,
    /// Half-width of the overlap window around each switch.
    pub spread_window_minutes: i64,
    pub selection: ContractSelection,
    /// Close-to-close move (points) reported by verification.
    pub discontinuity_threshold: f64,
    /// Decimal places written for adjusted prices. `None` writes the
    /// shortest round-trip text, which keeps adjusted level files aligned
    /// bit-for-bit with the written closes.
    pub price_decimals: Option<usize>,
}

/// TOML shape: every field optional, filled from the resolution preset.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildConfigFile {
    product: Option<Product>,
    resolution: Option<Resolution>,
    bucket: Option<BucketWidth>,
    persistence: Option<PersistenceRule>,
    spread_window_minutes: Option<i64>,
    selection: Option<ContractSelection>,
    discontinuity_threshold: Option<f64>,
    price_decimals: Option<usize>,
}

impl BuildConfig {
    /// Preset for a product at a resolution.
    ///
    /// Minute data: daily buckets, 2 of 5 buckets to confirm, ±12h window.
    /// Second data: hourly buckets, 12 of 24 buckets to confirm, ±4h window.
    pub fn for_resolution(product: Product, resolution: Resolution) -> Self {
        let (bucket, persistence, spread_window_minutes) = match resolution {
            Resolution::Minute => (BucketWidth::Day, PersistenceRule::new(5, 2), 12 * 60),
            Resolution::Second => (BucketWidth::Hour, PersistenceRule::new(24, 12), 4 * 60),
        };
        Self {
            product,
            resolution,
            bucket,
            persistence,
            spread_window_minutes,
            selection: ContractSelection::BucketPrimary,
            discontinuity_threshold: 50.0,
            price_decimals: None,
        }
    }

    /// Parse a TOML config. Missing fields take the preset of the given
    /// (or default) product and resolution.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: BuildConfigFile = toml::from_str(toml_str)?;
        let preset = Self::for_resolution(
            file.product.unwrap_or(Product::Es),
            file.resolution.unwrap_or_default(),
        );
        let config = Self {
            bucket: file.bucket.unwrap_or(preset.bucket),
            persistence: file.persistence.unwrap_or(preset.persistence),
            spread_window_minutes: file
                .spread_window_minutes
                .unwrap_or(preset.spread_window_minutes),
            selection: file.selection.unwrap_or(preset.selection),
            discontinuity_threshold: file
                .discontinuity_threshold
                .unwrap_or(preset.discontinuity_threshold),
            price_decimals: file.price_decimals.or(preset.price_decimals),
            ..preset
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.persistence.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "persistence needs 1 <= min_count <= window, got min_count {} window {}",
                self.persistence.min_count, self.persistence.window
            )));
        }
        if !(1..=MAX_SPREAD_WINDOW_MINUTES).contains(&self.spread_window_minutes) {
            return Err(ConfigError::Invalid(format!(
                "spread_window_minutes must be between 1 and {MAX_SPREAD_WINDOW_MINUTES}, got {}",
                self.spread_window_minutes
            )));
        }
        if !(self.discontinuity_threshold.is_finite() && self.discontinuity_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "discontinuity_threshold must be a positive number, got {}",
                self.discontinuity_threshold
            )));
        }
        if let Some(decimals) = self.price_decimals.filter(|d| *d > 12) {
            return Err(ConfigError::Invalid(format!(
                "price_decimals must be at most 12, got {decimals}"
            )));
        }
        Ok(())
    }

    pub fn spread_window(&self) -> Duration {
        Duration::minutes(self.spread_window_minutes)
    }

    /// Deterministic BLAKE3 hash of the effective configuration.
    pub fn config_id(&self) -> Result<ConfigId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::for_resolution(Product::Es, Resolution::Minute)
    }
}

/// Default file locations of one product under a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductLayout {
    data_dir: PathBuf,
    product: Product,
}

impl ProductLayout {
    pub fn new(data_dir: impl Into<PathBuf>, product: Product) -> Self {
        Self {
            data_dir: data_dir.into(),
            product,
        }
    }

    fn ohlcv_dir(&self) -> PathBuf {
        self.data_dir.join("ohlcv").join(self.product.dir_name())
    }

    fn liquidity_dir(&self) -> PathBuf {
        self.data_dir.join("liquidity").join(self.product.dir_name())
    }

    /// Raw multi-contract bars, e.g. `ohlcv/es/ES_ohlcv_1m.csv`.
    pub fn source(&self, resolution: Resolution) -> PathBuf {
        self.ohlcv_dir()
            .join(format!("{}_ohlcv_{}.csv", self.product.root(), resolution.tag()))
    }

    /// Continuous output, e.g. `ohlcv/es/ES_ohlcv_1m_continuous.csv`.
    pub fn continuous(&self, resolution: Resolution) -> PathBuf {
        self.ohlcv_dir().join(format!(
            "{}_ohlcv_{}_continuous.csv",
            self.product.root(),
            resolution.tag()
        ))
    }

    pub fn rollover_log(&self) -> PathBuf {
        self.ohlcv_dir()
            .join(format!("{}_rollover_log.csv", self.product.root()))
    }

    pub fn levels(&self) -> PathBuf {
        self.liquidity_dir()
            .join(format!("{}_liquidity_levels_15m.csv", self.product.root()))
    }

    pub fn levels_adjusted(&self) -> PathBuf {
        self.liquidity_dir().join(format!(
            "{}_liquidity_levels_15m_backadjusted.csv",
            self.product.root()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_per_resolution() {
        let minute = BuildConfig::for_resolution(Product::Es, Resolution::Minute);
        assert_eq!(minute.bucket, BucketWidth::Day);
        assert_eq!(minute.persistence, PersistenceRule::new(5, 2));
        assert_eq!(minute.spread_window(), Duration::hours(12));

        let second = BuildConfig::for_resolution(Product::Nq, Resolution::Second);
        assert_eq!(second.bucket, BucketWidth::Hour);
        assert_eq!(second.persistence, PersistenceRule::new(24, 12));
        assert_eq!(second.spread_window(), Duration::hours(4));
        assert_eq!(second.discontinuity_threshold, 50.0);
    }

    #[test]
    fn test_toml_overrides_preset() {
        let config = BuildConfig::from_toml(
            r#"
product = "nq"
resolution = "second"
selection = "rollover_period"
discontinuity_threshold = 120.0

[persistence]
window = 48
min_count = 20
"#,
        )
        .unwrap();
        assert_eq!(config.product, Product::Nq);
        assert_eq!(config.bucket, BucketWidth::Hour);
        assert_eq!(config.persistence, PersistenceRule::new(48, 20));
        assert_eq!(config.spread_window_minutes, 240);
        assert_eq!(config.selection, ContractSelection::RolloverPeriod);
        assert_eq!(config.discontinuity_threshold, 120.0);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(BuildConfig::from_toml("").unwrap(), BuildConfig::default());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            BuildConfig::from_toml("bucket_width = \"day\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_persistence_rejected() {
        let err = BuildConfig::from_toml("[persistence]\nwindow = 2\nmin_count = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_spread_window_bounds() {
        for minutes in [0, -5, MAX_SPREAD_WINDOW_MINUTES + 1, i64::MAX] {
            let err = BuildConfig::from_toml(&format!("spread_window_minutes = {minutes}\n"))
                .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{minutes}");
        }
        let widest =
            BuildConfig::from_toml(&format!("spread_window_minutes = {MAX_SPREAD_WINDOW_MINUTES}\n"))
                .unwrap();
        assert_eq!(widest.spread_window(), Duration::days(366));
    }

    #[test]
    fn test_price_decimals() {
        assert_eq!(BuildConfig::default().price_decimals, None);
        let fixed = BuildConfig::from_toml("price_decimals = 4\n").unwrap();
        assert_eq!(fixed.price_decimals, Some(4));
        assert!(matches!(
            BuildConfig::from_toml("price_decimals = 13\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_config_id_deterministic() {
        let a = BuildConfig::default();
        let b = BuildConfig::default();
        assert_eq!(a.config_id().unwrap(), b.config_id().unwrap());
        assert_eq!(a.config_id().unwrap().len(), 64);
    }

    #[test]
    fn test_config_id_changes_with_params() {
        let a = BuildConfig::default();
        let b = BuildConfig {
            discontinuity_threshold: 75.0,
            ..BuildConfig::default()
        };
        assert_ne!(a.config_id().unwrap(), b.config_id().unwrap());
    }

    #[test]
    fn test_product_layout_paths() {
        let layout = ProductLayout::new("data", Product::Es);
        assert_eq!(
            layout.source(Resolution::Minute),
            Path::new("data/ohlcv/es/ES_ohlcv_1m.csv")
        );
        assert_eq!(
            layout.continuous(Resolution::Second),
            Path::new("data/ohlcv/es/ES_ohlcv_1s_continuous.csv")
        );
        assert_eq!(layout.rollover_log(), Path::new("data/ohlcv/es/ES_rollover_log.csv"));
        assert_eq!(
            layout.levels_adjusted(),
            Path::new("data/liquidity/es/ES_liquidity_levels_15m_backadjusted.csv")
        );
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("1s".parse::<Resolution>().unwrap(), Resolution::Second);
        assert_eq!("Minute".parse::<Resolution>().unwrap(), Resolution::Minute);
        assert!("tick".parse::<Resolution>().is_err());
    }
}
