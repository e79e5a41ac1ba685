use crate::estimate::FitError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scheme used to express a scattered point in terms of grid node values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpMethod {
    /// One unit weight on the closest corner of the containing cell.
    Nearest,
    /// Multilinear weights on all `2^n` corners of the containing cell.
    #[default]
    Linear,
}

impl InterpMethod {
    /// Number of nonzero weights emitted for each point in `ndim` dimensions.
    pub fn weights_per_point(self, ndim: usize) -> usize {
        match self {
            Self::Nearest => 1,
            Self::Linear => 1usize << ndim,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Linear => "linear",
        }
    }
}

impl fmt::Display for InterpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InterpMethod {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "linear" => Ok(Self::Linear),
            _ => Err(FitError::UnsupportedMethod(s.to_string())),
        }
    }
}

/// How the stacked least-squares system is solved.
///
/// `Normal` forms `A'A z = A'b` and factorizes the square system. It is the
/// faster path, but it squares the condition number of `A`; when the grid is
/// large relative to the data or the smoothness is tiny, prefer `Direct`,
/// which runs a sparse QR on the rectangular system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    Direct,
    #[default]
    Normal,
}

impl SolverKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SolverKind {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "normal" => Ok(Self::Normal),
            _ => Err(FitError::UnsupportedSolver(s.to_string())),
        }
    }
}

pub fn default_smoothness_weight() -> f64 {
    0.01
}

/// Per-axis weight on the second-derivative penalty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Smoothness {
    /// The same weight on every axis.
    Uniform(f64),
    /// One weight per axis; zero removes that axis' penalty rows entirely.
    PerAxis(Vec<f64>),
}

impl Default for Smoothness {
    fn default() -> Self {
        Self::Uniform(default_smoothness_weight())
    }
}

impl Smoothness {
    /// Expands to one validated weight per axis.
    pub fn resolve(&self, ndim: usize) -> Result<Vec<f64>, FitError> {
        let weights = match self {
            Self::Uniform(w) => vec![*w; ndim],
            Self::PerAxis(ws) => {
                if ws.len() != ndim {
                    return Err(FitError::InputShape {
                        field: "smoothness",
                        expected: ndim,
                        found: ws.len(),
                    });
                }
                ws.clone()
            }
        };
        for (axis, &value) in weights.iter().enumerate() {
            if !value.is_finite() || value < 0.0 {
                return Err(FitError::InvalidSmoothness { axis, value });
            }
        }
        Ok(weights)
    }
}

impl From<f64> for Smoothness {
    fn from(value: f64) -> Self {
        Self::Uniform(value)
    }
}

impl From<Vec<f64>> for Smoothness {
    fn from(values: Vec<f64>) -> Self {
        Self::PerAxis(values)
    }
}

/// Options for a single fit call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FitOptions {
    #[serde(default)]
    pub smoothness: Smoothness,
    #[serde(default)]
    pub interp_method: InterpMethod,
    #[serde(default)]
    pub solver: SolverKind,
}

impl FitOptions {
    pub fn new(smoothness: impl Into<Smoothness>, interp_method: InterpMethod, solver: SolverKind) -> Self {
        Self {
            smoothness: smoothness.into(),
            interp_method,
            solver,
        }
    }

    pub fn from_json_str(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
