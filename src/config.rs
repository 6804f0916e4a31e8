//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::arbitrage::detector::MAX_CANDIDATE_ASSETS;
use crate::arbitrage::executor::MAX_CONCURRENT_EXECUTIONS;
use crate::arbitrage::{ExecutionSettings, PriorityWeights, ScannerSettings};
use crate::engine::EngineSettings;
use crate::market::FeeTable;
use crate::risk::{LiquiditySettings, RiskFactor, RiskSettings};

/// Named presets for the profile-tuned fields.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Profile {
    /// Few, larger-margin trades.
    Conservative,
    /// Default trade-off.
    #[default]
    Balanced,
    /// Thin margins, more trial sizes, faster cycles.
    Aggressive,
}

/// Values a profile supplies when the environment does not.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilePreset {
    /// Minimum net gain.
    pub profit_threshold: Decimal,
    /// Trial amounts in the base asset.
    pub trial_amounts: Vec<Decimal>,
    /// Pause between cycles.
    pub sleep_between_secs: u64,
    /// Absolute position cap.
    pub max_position_size: Decimal,
    /// Minimum scanner confidence.
    pub min_confidence: Decimal,
}

impl Profile {
    /// Preset values for this profile.
    pub fn preset(self) -> ProfilePreset {
        match self {
            Profile::Conservative => ProfilePreset {
                profit_threshold: dec!(0.005),
                trial_amounts: vec![dec!(10)],
                sleep_between_secs: 3,
                max_position_size: dec!(25),
                min_confidence: dec!(0.75),
            },
            Profile::Balanced => ProfilePreset {
                profit_threshold: dec!(0.001),
                trial_amounts: vec![dec!(10), dec!(25), dec!(50)],
                sleep_between_secs: 2,
                max_position_size: dec!(50),
                min_confidence: dec!(0.6),
            },
            Profile::Aggressive => ProfilePreset {
                profit_threshold: dec!(0.0005),
                trial_amounts: vec![dec!(10), dec!(15), dec!(20), dec!(25), dec!(30)],
                sleep_between_secs: 1,
                max_position_size: dec!(35),
                min_confidence: dec!(0.5),
            },
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Operation Modes ===
    /// Paper trading against live books (no real orders).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Preset for the profile-tuned fields.
    #[serde(default)]
    pub profile: Profile,

    // === Scanning ===
    /// Asset every cycle starts and ends in.
    #[serde(default = "default_base_asset")]
    pub base_asset: String,

    /// Minimum net gain; overrides the profile.
    #[serde(default)]
    pub profit_threshold: Option<Decimal>,

    /// Comma-separated trial amounts; overrides the profile.
    #[serde(default)]
    pub trial_amounts: Option<Vec<Decimal>>,

    /// Penalty applied to volume beyond the visible book.
    #[serde(default = "default_slippage_pct")]
    pub slippage_pct: Decimal,

    /// Maximum total slippage for a viable route.
    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: Decimal,

    /// Maximum slippage per scan result and per executed hop.
    #[serde(default = "default_max_slippage")]
    pub max_slippage: Decimal,

    /// Pairs quoted in the base asset kept by 24h quote volume.
    #[serde(default = "default_top_n_pairs")]
    pub top_n_pairs: usize,

    /// Book levels fetched per side.
    #[serde(default = "default_book_limit")]
    pub book_limit: usize,

    /// Candidate assets kept after ranking by depth.
    #[serde(default = "default_candidate_limit")]
    pub candidate_asset_limit: usize,

    /// Longest route in trades (3 or 4).
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,

    /// Also scan each cycle in the opposite direction.
    #[serde(default = "default_true")]
    pub scan_reverse_routes: bool,

    /// Opportunities kept per scan.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Lifetime of cached route evaluations.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Expected holding time billed for margin interest.
    #[serde(default)]
    pub hold_seconds: u64,

    /// Hourly margin interest rate.
    #[serde(default)]
    pub hourly_interest_rate: Decimal,

    /// Books older than this are stale.
    #[serde(default = "default_max_book_age_ms")]
    pub max_book_age_ms: u64,

    /// Pause between cycles; overrides the profile.
    #[serde(default)]
    pub sleep_between_secs: Option<u64>,

    // === Risk ===
    /// Absolute position cap; overrides the profile.
    #[serde(default)]
    pub max_position_size: Option<Decimal>,

    /// Largest fraction of capital per trade.
    #[serde(default = "default_max_position_risk")]
    pub max_position_risk: Decimal,

    /// Largest fraction of capital committed per UTC day.
    #[serde(default = "default_max_daily_risk")]
    pub max_daily_risk: Decimal,

    /// Trades allowed per UTC day.
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,

    /// Minimum scanner confidence; overrides the profile.
    #[serde(default)]
    pub min_confidence: Option<Decimal>,

    /// Minimum profit over worst-case loss.
    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: Decimal,

    /// Risk factors that reject on their own.
    #[serde(default = "default_critical_risk_factors")]
    pub critical_risk_factors: Vec<String>,

    // === Execution ===
    /// Deadline per order attempt.
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,

    /// Submission attempts per order.
    #[serde(default = "default_order_max_retries")]
    pub order_max_retries: u32,

    /// Pause between order attempts.
    #[serde(default = "default_order_retry_backoff_ms")]
    pub order_retry_backoff_ms: u64,

    /// Concurrent executions (1 to 3).
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,

    /// Allow margin execution of triangles.
    #[serde(default)]
    pub margin_enabled: bool,

    /// Smallest amount executed on margin.
    #[serde(default = "default_margin_min_amount")]
    pub margin_min_amount: Decimal,

    /// Smallest amount executed at all.
    #[serde(default = "default_min_trade_amount")]
    pub min_trade_amount: Decimal,

    // === Fees ===
    /// Flat taker fee; overrides the VIP schedule.
    #[serde(default)]
    pub taker_fee: Option<Decimal>,

    /// Flat maker fee; overrides the VIP schedule.
    #[serde(default)]
    pub maker_fee: Option<Decimal>,

    /// VIP tier, 0 to 9.
    #[serde(default)]
    pub fee_vip_tier: u8,

    /// Pay fees in the exchange token for the discount.
    #[serde(default)]
    pub fee_token_discount: bool,

    // === Simulation ===
    /// Starting base asset balance for paper trading.
    #[serde(default = "default_sim_balance")]
    pub sim_balance: Decimal,

    // === Exchange ===
    /// REST API base URL.
    #[serde(default = "default_exchange_rest_url")]
    pub exchange_rest_url: String,

    /// HTTP request timeout.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// How often symbol metadata is reloaded.
    #[serde(default = "default_symbol_refresh_secs")]
    pub symbol_refresh_secs: u64,

    /// Symbol whose 24h move and volume gauge market conditions.
    #[serde(default = "default_volatility_proxy_symbol")]
    pub volatility_proxy_symbol: String,

    // === Server Configuration ===
    /// HTTP server port for health/metrics endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_true() -> bool {
    true
}

fn default_base_asset() -> String {
    "USDT".to_string()
}

fn default_slippage_pct() -> Decimal {
    dec!(0.001)
}

fn default_slippage_tolerance() -> Decimal {
    dec!(0.005)
}

fn default_max_slippage() -> Decimal {
    dec!(0.02)
}

fn default_top_n_pairs() -> usize {
    50
}

fn default_book_limit() -> usize {
    10
}

fn default_candidate_limit() -> usize {
    15
}

fn default_max_hops() -> usize {
    3
}

fn default_max_results() -> usize {
    20
}

fn default_cache_ttl_ms() -> u64 {
    2000
}

fn default_max_book_age_ms() -> u64 {
    5000
}

fn default_max_position_risk() -> Decimal {
    dec!(0.02)
}

fn default_max_daily_risk() -> Decimal {
    dec!(0.10)
}

fn default_max_daily_trades() -> u32 {
    50
}

fn default_min_risk_reward() -> Decimal {
    dec!(2)
}

fn default_critical_risk_factors() -> Vec<String> {
    vec![
        RiskFactor::InsufficientLiquidity.to_string(),
        RiskFactor::DailyRiskNearLimit.to_string(),
    ]
}

fn default_order_timeout_ms() -> u64 {
    8000
}

fn default_order_max_retries() -> u32 {
    3
}

fn default_order_retry_backoff_ms() -> u64 {
    100
}

fn default_max_concurrent_executions() -> usize {
    1
}

fn default_margin_min_amount() -> Decimal {
    dec!(50)
}

fn default_min_trade_amount() -> Decimal {
    dec!(10)
}

fn default_sim_balance() -> Decimal {
    dec!(1000)
}

fn default_exchange_rest_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_http_timeout_ms() -> u64 {
    2000
}

fn default_symbol_refresh_secs() -> u64 {
    3600
}

fn default_volatility_proxy_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Load configuration from explicit `(NAME, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars)
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_asset.trim().is_empty() {
            return Err("BASE_ASSET is required".to_string());
        }

        let threshold = self.profit_threshold();
        if threshold < Decimal::ZERO || threshold >= Decimal::ONE {
            return Err("PROFIT_THRESHOLD must be in [0, 1)".to_string());
        }

        let amounts = self.trial_amounts();
        if amounts.is_empty() {
            return Err("TRIAL_AMOUNTS must not be empty".to_string());
        }
        if amounts.iter().any(|a| *a < self.min_trade_amount) {
            return Err(format!(
                "TRIAL_AMOUNTS must each be at least MIN_TRADE_AMOUNT ({})",
                self.min_trade_amount
            ));
        }

        if !(3..=4).contains(&self.max_hops) {
            return Err("MAX_HOPS must be 3 or 4".to_string());
        }

        if !(2..=MAX_CANDIDATE_ASSETS).contains(&self.candidate_asset_limit) {
            return Err(format!(
                "CANDIDATE_ASSET_LIMIT must be between 2 and {MAX_CANDIDATE_ASSETS}"
            ));
        }

        for (name, value) in [
            ("SLIPPAGE_PCT", self.slippage_pct),
            ("SLIPPAGE_TOLERANCE", self.slippage_tolerance),
            ("MAX_SLIPPAGE", self.max_slippage),
        ] {
            if value < Decimal::ZERO || value >= Decimal::ONE {
                return Err(format!("{name} must be in [0, 1)"));
            }
        }

        if self.max_position_risk <= Decimal::ZERO || self.max_position_risk > Decimal::ONE {
            return Err("MAX_POSITION_RISK must be in (0, 1]".to_string());
        }
        if self.max_daily_risk < self.max_position_risk || self.max_daily_risk > Decimal::ONE {
            return Err("MAX_DAILY_RISK must be between MAX_POSITION_RISK and 1".to_string());
        }

        let confidence = self.min_confidence();
        if confidence < Decimal::ZERO || confidence > Decimal::ONE {
            return Err("MIN_CONFIDENCE must be in [0, 1]".to_string());
        }

        if let Some(bad) = self
            .critical_risk_factors
            .iter()
            .find(|f| RiskFactor::from_str(f.trim()).is_err())
        {
            return Err(format!("CRITICAL_RISK_FACTORS contains unknown factor '{bad}'"));
        }

        if !(1..=MAX_CONCURRENT_EXECUTIONS).contains(&self.max_concurrent_executions) {
            return Err(format!(
                "MAX_CONCURRENT_EXECUTIONS must be between 1 and {MAX_CONCURRENT_EXECUTIONS}"
            ));
        }

        if self.order_max_retries == 0 {
            return Err("ORDER_MAX_RETRIES must be at least 1".to_string());
        }

        if self.fee_vip_tier > 9 {
            return Err("FEE_VIP_TIER must be between 0 and 9".to_string());
        }

        if self.book_limit == 0 || self.top_n_pairs == 0 {
            return Err("BOOK_LIMIT and TOP_N_PAIRS must be positive".to_string());
        }

        Ok(())
    }

    /// Effective profit threshold.
    pub fn profit_threshold(&self) -> Decimal {
        self.profit_threshold
            .unwrap_or_else(|| self.profile.preset().profit_threshold)
    }

    /// Effective trial amounts.
    pub fn trial_amounts(&self) -> Vec<Decimal> {
        self.trial_amounts
            .clone()
            .unwrap_or_else(|| self.profile.preset().trial_amounts)
    }

    /// Effective pause between cycles.
    pub fn sleep_between(&self) -> Duration {
        Duration::from_secs(
            self.sleep_between_secs
                .unwrap_or_else(|| self.profile.preset().sleep_between_secs),
        )
    }

    /// Effective absolute position cap.
    pub fn max_position_size(&self) -> Decimal {
        self.max_position_size
            .unwrap_or_else(|| self.profile.preset().max_position_size)
    }

    /// Effective minimum scanner confidence.
    pub fn min_confidence(&self) -> Decimal {
        self.min_confidence
            .unwrap_or_else(|| self.profile.preset().min_confidence)
    }

    /// Scanner settings.
    pub fn scanner_settings(&self) -> ScannerSettings {
        ScannerSettings {
            base_asset: self.base_asset.clone(),
            profit_threshold: self.profit_threshold(),
            max_hops: self.max_hops,
            candidate_limit: self.candidate_asset_limit,
            scan_reverse: self.scan_reverse_routes,
            min_confidence: self.min_confidence(),
            max_execution_secs: dec!(10),
            max_slippage: self.max_slippage,
            max_results: self.max_results,
            cache_ttl: Duration::from_millis(self.cache_ttl_ms),
            hold_secs: self.hold_seconds,
            hourly_interest_rate: self.hourly_interest_rate,
            weights: PriorityWeights::default(),
        }
    }

    /// Liquidity check settings.
    pub fn liquidity_settings(&self) -> LiquiditySettings {
        LiquiditySettings {
            slippage_tolerance: self.slippage_tolerance,
            max_book_age: time::Duration::milliseconds(
                i64::try_from(self.max_book_age_ms).unwrap_or(i64::MAX),
            ),
            depth_levels: self.book_limit,
            ..LiquiditySettings::default()
        }
    }

    /// Risk settings. Unknown factor names are skipped; `validate` reports them.
    pub fn risk_settings(&self) -> RiskSettings {
        RiskSettings {
            max_position_risk: self.max_position_risk,
            max_daily_risk: self.max_daily_risk,
            max_daily_trades: self.max_daily_trades,
            min_risk_reward: self.min_risk_reward,
            critical_factors: self
                .critical_risk_factors
                .iter()
                .filter_map(|f| RiskFactor::from_str(f.trim()).ok())
                .collect(),
            max_position_size: Some(self.max_position_size()),
            ..RiskSettings::default()
        }
    }

    /// Execution settings.
    pub fn execution_settings(&self) -> ExecutionSettings {
        ExecutionSettings {
            min_trade_amount: self.min_trade_amount,
            max_slippage: self.max_slippage,
            order_timeout: Duration::from_millis(self.order_timeout_ms),
            max_retries: self.order_max_retries,
            retry_backoff: Duration::from_millis(self.order_retry_backoff_ms),
            max_concurrent: self.max_concurrent_executions,
            margin_enabled: self.margin_enabled,
            margin_min_amount: self.margin_min_amount,
            slippage_pct: self.slippage_pct,
        }
    }

    /// Cycle orchestration settings.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            base_asset: self.base_asset.clone(),
            trial_amounts: self.trial_amounts(),
            top_n_pairs: self.top_n_pairs,
            book_limit: self.book_limit,
            symbol_refresh: Duration::from_secs(self.symbol_refresh_secs),
            volatility_proxy: self.volatility_proxy_symbol.clone(),
            capital: self.sim_balance,
            ..EngineSettings::default()
        }
    }

    /// Fee table: flat rates when given, else the VIP schedule.
    pub fn fee_table(&self) -> FeeTable {
        let vip = FeeTable::vip(self.fee_vip_tier, self.fee_token_discount);
        match (self.maker_fee, self.taker_fee) {
            (None, None) => vip,
            (maker, taker) => FeeTable::flat(maker.unwrap_or(vip.maker), taker.unwrap_or(vip.taker)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(vars: &[(&str, &str)]) -> Config {
        Config::from_vars(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn default_values_are_sensible() {
        let config = config(&[]);
        assert!(config.dry_run);
        assert_eq!(config.profile, Profile::Balanced);
        assert_eq!(config.base_asset, "USDT");
        assert_eq!(config.profit_threshold(), dec!(0.001));
        assert_eq!(config.trial_amounts(), vec![dec!(10), dec!(25), dec!(50)]);
        assert_eq!(config.sleep_between(), Duration::from_secs(2));
        assert_eq!(config.order_timeout_ms, 8000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn profile_supplies_presets() {
        let config = config(&[("PROFILE", "aggressive")]);
        assert_eq!(config.profile, Profile::Aggressive);
        assert_eq!(config.profit_threshold(), dec!(0.0005));
        assert_eq!(config.trial_amounts().len(), 5);
        assert_eq!(config.max_position_size(), dec!(35));
        assert_eq!(config.min_confidence(), dec!(0.5));

        assert_eq!("Conservative".parse::<Profile>().unwrap(), Profile::Conservative);
    }

    #[test]
    fn explicit_values_override_profile() {
        let config = config(&[
            ("PROFILE", "conservative"),
            ("PROFIT_THRESHOLD", "0.002"),
            ("TRIAL_AMOUNTS", "20,40"),
            ("SLEEP_BETWEEN_SECS", "5"),
        ]);
        assert_eq!(config.profit_threshold(), dec!(0.002));
        assert_eq!(config.trial_amounts(), vec![dec!(20), dec!(40)]);
        assert_eq!(config.sleep_between(), Duration::from_secs(5));
        assert_eq!(config.min_confidence(), dec!(0.75));
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(config(&[("MAX_HOPS", "5")]).validate().is_err());
        assert!(config(&[("TRIAL_AMOUNTS", "5")]).validate().is_err());
        assert!(config(&[("PROFIT_THRESHOLD", "1.5")]).validate().is_err());
        assert!(config(&[("MAX_CONCURRENT_EXECUTIONS", "4")]).validate().is_err());
        assert!(config(&[("CRITICAL_RISK_FACTORS", "low_volume,moon_phase")])
            .validate()
            .is_err());
        assert!(config(&[("BASE_ASSET", " ")]).validate().is_err());
    }

    #[test]
    fn builds_component_settings() {
        let config = config(&[
            ("CRITICAL_RISK_FACTORS", "high_volatility,low_volume"),
            ("MARGIN_ENABLED", "true"),
            ("CACHE_TTL_MS", "500"),
        ]);

        let risk = config.risk_settings();
        assert_eq!(
            risk.critical_factors,
            vec![RiskFactor::HighVolatility, RiskFactor::LowVolume]
        );
        assert_eq!(risk.max_position_size, Some(dec!(50)));

        let execution = config.execution_settings();
        assert!(execution.margin_enabled);
        assert_eq!(execution.order_timeout, Duration::from_secs(8));

        let scanner = config.scanner_settings();
        assert_eq!(scanner.cache_ttl, Duration::from_millis(500));
        assert_eq!(scanner.min_confidence, dec!(0.6));

        assert_eq!(config.engine_settings().trial_amounts, config.trial_amounts());
    }

    #[test]
    fn fee_table_selection() {
        assert_eq!(config(&[]).fee_table(), FeeTable::vip(0, false));
        assert_eq!(
            config(&[("FEE_VIP_TIER", "9"), ("FEE_TOKEN_DISCOUNT", "true")]).fee_table(),
            FeeTable::vip(9, true)
        );
        let flat = config(&[("TAKER_FEE", "0.00075")]).fee_table();
        assert_eq!(flat.taker, dec!(0.00075));
        assert_eq!(flat.maker, dec!(0.001));
    }
}
