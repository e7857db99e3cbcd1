use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric format a model's parameters are stored and computed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Precision {
    FP32,
    #[default]
    FP16,
    BF16,
    INT8,
    FP4,
    INT4,
}

/// Per-precision characteristics: storage cost and relative compute cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionSpec {
    pub name: &'static str,
    pub bytes_per_parameter: f64,
    /// Multiplier on per-token compute demand, FP32 = 1.0.
    pub compute_performance_factor: f64,
}

impl Precision {
    pub const ALL: [Precision; 6] = [
        Precision::FP32,
        Precision::FP16,
        Precision::BF16,
        Precision::INT8,
        Precision::FP4,
        Precision::INT4,
    ];

    /// Precision used when a caller names one the table does not know.
    pub const REFERENCE: Precision = Precision::FP16;

    pub fn spec(self) -> PrecisionSpec {
        match self {
            Precision::FP32 => PrecisionSpec {
                name: "FP32 (Full Precision)",
                bytes_per_parameter: 4.0,
                compute_performance_factor: 1.0,
            },
            Precision::FP16 => PrecisionSpec {
                name: "FP16 (Half Precision)",
                bytes_per_parameter: 2.0,
                compute_performance_factor: 0.9,
            },
            Precision::BF16 => PrecisionSpec {
                name: "BF16 (BFloat16)",
                bytes_per_parameter: 2.0,
                compute_performance_factor: 0.85,
            },
            Precision::INT8 => PrecisionSpec {
                name: "INT8 (8-bit Integer)",
                bytes_per_parameter: 1.0,
                compute_performance_factor: 0.6,
            },
            Precision::FP4 => PrecisionSpec {
                name: "FP4 (4-bit Float)",
                bytes_per_parameter: 0.5,
                compute_performance_factor: 0.3,
            },
            Precision::INT4 => PrecisionSpec {
                name: "INT4 (4-bit Integer)",
                bytes_per_parameter: 0.5,
                compute_performance_factor: 0.25,
            },
        }
    }

    pub fn bytes_per_parameter(self) -> f64 {
        self.spec().bytes_per_parameter
    }

    pub fn compute_performance_factor(self) -> f64 {
        self.spec().compute_performance_factor
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Precision::FP32 => "FP32",
            Precision::FP16 => "FP16",
            Precision::BF16 => "BF16",
            Precision::INT8 => "INT8",
            Precision::FP4 => "FP4",
            Precision::INT4 => "INT4",
        }
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FP32" => Ok(Self::FP32),
            "FP16" => Ok(Self::FP16),
            "BF16" => Ok(Self::BF16),
            "INT8" => Ok(Self::INT8),
            "FP4" => Ok(Self::FP4),
            "INT4" => Ok(Self::INT4),
            _ => Err(format!(
                "unsupported precision '{}', expected one of: FP32, FP16, BF16, INT8, FP4, INT4",
                value
            )),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
