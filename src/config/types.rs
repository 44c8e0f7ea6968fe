use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub fragment: FragmentConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FragmentConfig {
    /// Fragment duration in milliseconds (detected from the video track if unset)
    #[serde(default)]
    pub duration_ms: Option<u32>,

    /// Output timescale for every track (native media timescale if unset)
    #[serde(default)]
    pub timescale: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogConfig {
    /// 0 (quiet) to 3
    #[serde(default)]
    pub verbosity: u8,

    /// Log fragment boundary decisions
    #[serde(default)]
    pub debug: bool,
}

/// Highest supported verbosity level.
pub const MAX_VERBOSITY: u8 = 3;
