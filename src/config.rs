use crate::error::{MsaError, Result};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default element budget for one reprojection chunk.
pub const DEFAULT_REPROJECTION_BUDGET: usize = 250_000_000;

/// Fit-pass size (in elements) above which a memory estimate is logged.
pub const DEFAULT_MEMORY_WARNING_THRESHOLD: usize = 500_000_000;

/// Decomposition algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Pca,
    FastIca,
    /// Latent Dirichlet allocation. Needs non-negative input, so the data is
    /// shifted before fitting and every reprojected chunk gets the same shift.
    Lda,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Pca => "pca",
            Mode::FastIca => "fastica",
            Mode::Lda => "lda",
        }
    }

    pub fn requires_positivity(&self) -> bool {
        matches!(self, Mode::Lda)
    }

    /// Whether component images can be read as linear eigenimages.
    pub fn is_linear(&self) -> bool {
        matches!(self, Mode::Pca | Mode::FastIca)
    }
}

impl FromStr for Mode {
    type Err = MsaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pca" => Ok(Mode::Pca),
            "fastica" => Ok(Mode::FastIca),
            "lda" => Ok(Mode::Lda),
            other => Err(MsaError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct MsaConfig {
    pub mode: Mode,
    pub n_basis: usize,
    pub mask_file: Option<PathBuf>,
    pub mask_radius: i32,
    pub simmx: Option<PathBuf>,
    pub normalize: bool,
    pub step: String,
    pub seed: u64,
    pub reprojection_budget: usize,
    pub memory_warning_threshold: usize,
}

impl MsaConfig {
    pub fn new() -> Self {
        Self {
            mode: Mode::Pca,
            n_basis: 20,
            mask_file: None,
            mask_radius: 0,
            simmx: None,
            normalize: false,
            step: "0,1".to_string(),
            seed: 0,
            reprojection_budget: DEFAULT_REPROJECTION_BUDGET,
            memory_warning_threshold: DEFAULT_MEMORY_WARNING_THRESHOLD,
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn n_basis(mut self, n_basis: usize) -> Self {
        self.n_basis = n_basis;
        self
    }

    pub fn mask_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mask_file = Some(path.into());
        self
    }

    pub fn mask_radius(mut self, radius: i32) -> Self {
        self.mask_radius = radius;
        self
    }

    pub fn simmx(mut self, path: impl Into<PathBuf>) -> Self {
        self.simmx = Some(path.into());
        self
    }

    pub fn normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn step(mut self, step: &str) -> Self {
        self.step = step.to_string();
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn reprojection_budget(mut self, elements: usize) -> Self {
        self.reprojection_budget = elements;
        self
    }

    pub fn memory_warning_threshold(mut self, elements: usize) -> Self {
        self.memory_warning_threshold = elements;
        self
    }
}

impl Default for MsaConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("pca".parse::<Mode>().unwrap(), Mode::Pca);
        assert_eq!("fastica".parse::<Mode>().unwrap(), Mode::FastIca);
        assert_eq!("lda".parse::<Mode>().unwrap(), Mode::Lda);
    }

    #[test]
    fn test_unknown_mode_is_an_error() {
        let err = "nmf".parse::<Mode>().unwrap_err();
        assert!(matches!(err, MsaError::UnknownMode(ref m) if m == "nmf"));
        assert!("PCA".parse::<Mode>().is_err());
    }

    #[test]
    fn test_mode_properties() {
        assert!(Mode::Lda.requires_positivity());
        assert!(!Mode::Pca.requires_positivity());
        assert!(Mode::FastIca.is_linear());
        assert!(!Mode::Lda.is_linear());
        assert_eq!(Mode::FastIca.to_string(), "fastica");
    }

    #[test]
    fn test_config_defaults_and_builder() {
        let config = MsaConfig::default();
        assert_eq!(config.mode, Mode::Pca);
        assert_eq!(config.n_basis, 20);
        assert_eq!(config.step, "0,1");
        assert_eq!(config.reprojection_budget, 250_000_000);

        let config = MsaConfig::new()
            .mode(Mode::Lda)
            .n_basis(4)
            .mask_radius(-2)
            .normalize(true)
            .step("0,2")
            .reprojection_budget(1000);
        assert_eq!(config.mode, Mode::Lda);
        assert_eq!(config.n_basis, 4);
        assert_eq!(config.mask_radius, -2);
        assert!(config.normalize);
        assert_eq!(config.step, "0,2");
        assert_eq!(config.reprojection_budget, 1000);
    }
}
