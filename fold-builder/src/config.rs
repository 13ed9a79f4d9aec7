//! Fold building configuration format.

use crate::common::*;
use fewshot_data::{SourceSplit, DEFAULT_SHOTS};

pub use dataset::*;
pub use output::*;
pub use sampling::*;

/// The main fold building configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub folds: FoldsConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    pub output: OutputConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.dataset.source_files().is_empty(),
            "at least one of 'train_file' and 'val_file' must be set"
        );
        ensure!(!self.sampling.shots.is_empty(), "'shots' must not be empty");
        ensure!(
            self.sampling.shots.iter().all(|&k| k > 0),
            "'shots' must be positive"
        );
        Ok(())
    }
}

/// Fold definition options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FoldsConfig {
    /// JSON5 file mapping fold names to novel category names. The built-in
    /// OD-25 folds are used if absent.
    pub folds_file: Option<PathBuf>,
}

mod dataset {
    use super::*;

    /// Source corpus options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        pub train_file: Option<PathBuf>,
        pub val_file: Option<PathBuf>,
        /// The directory image file names are relative to.
        pub image_root: PathBuf,
        /// Drop degenerate boxes instead of failing.
        #[serde(default)]
        pub sanitize: bool,
        #[serde(default)]
        pub universe: UniverseKind,
    }

    impl DatasetConfig {
        pub fn source_files(&self) -> Vec<(SourceSplit, &Path)> {
            [
                (SourceSplit::Train, &self.train_file),
                (SourceSplit::Val, &self.val_file),
            ]
            .into_iter()
            .filter_map(|(split, file)| Some((split, file.as_deref()?)))
            .collect()
        }
    }

    /// Where the category universe comes from.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum UniverseKind {
        /// The fixed 100 VizWiz categories.
        Vizwiz,
        /// The categories of the first loaded source corpus.
        Corpus,
    }

    impl Default for UniverseKind {
        fn default() -> Self {
            Self::Vizwiz
        }
    }
}

mod sampling {
    use super::*;

    /// K-shot sampling options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SamplingConfig {
        #[serde(default = "default_shots")]
        pub shots: Vec<usize>,
        #[serde(default)]
        pub seed: u64,
    }

    impl Default for SamplingConfig {
        fn default() -> Self {
            Self {
                shots: default_shots(),
                seed: 0,
            }
        }
    }

    fn default_shots() -> Vec<usize> {
        DEFAULT_SHOTS.to_vec()
    }
}

mod output {
    use super::*;

    /// Output options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct OutputConfig {
        pub dir: PathBuf,
        /// Build folds concurrently.
        #[serde(default)]
        pub parallel: bool,
        /// Writes the registered dataset names if set.
        pub registry: Option<RegistryConfig>,
    }

    /// Dataset registry manifest options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RegistryConfig {
        #[serde(default = "default_prefix")]
        pub prefix: String,
        pub manifest_file: PathBuf,
    }

    fn default_prefix() -> String {
        "vizwiz".to_owned()
    }
}
