use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Environment variable naming the config directory.
pub const CONFIG_DIR_ENV: &str = "RECOMMENDER_CONFIG_DIR";

/// Config directory used when [`CONFIG_DIR_ENV`] is unset.
pub const DEFAULT_CONFIG_DIR: &str = "config";

/// Grace period for background tasks to exit after shutdown is signalled.
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Technical mapping thresholds
// ---------------------------------------------------------------------------

/// RSI above this is overbought (SELL).
pub const RSI_OVERBOUGHT: Decimal = dec!(70);

/// RSI below this is oversold (BUY).
pub const RSI_OVERSOLD: Decimal = dec!(30);

/// Distance from the threshold to the extreme (0 or 100); scales strength.
pub const RSI_SPAN: Decimal = dec!(30);

/// Fraction of price within which a support/resistance level counts as near.
pub const SR_PROXIMITY: Decimal = dec!(0.01);
