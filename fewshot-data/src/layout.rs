//! Output file naming.

use crate::common::*;

/// The source split a corpus comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSplit {
    Train,
    Val,
}

impl SourceSplit {
    pub const ALL: [SourceSplit; 2] = [SourceSplit::Train, SourceSplit::Val];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
        }
    }
}

impl fmt::Display for SourceSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of subset derived from a source split within a fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "subset", content = "shots", rename_all = "snake_case")]
pub enum Variant {
    Base,
    Novel,
    NovelShot(usize),
}

impl Variant {
    /// The name suffix shared by file names and dataset names,
    /// e.g. `base` or `novel_5shot`.
    pub fn suffix(&self) -> String {
        match *self {
            Self::Base => "base".to_owned(),
            Self::Novel => "novel".to_owned(),
            Self::NovelShot(k) => format!("novel_{}shot", k),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix())
    }
}

/// The directory tree fold outputs are written to.
///
/// A corpus lands at `<root>/<fold>/instances_<split>_<variant>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn fold_dir(&self, fold: &str) -> PathBuf {
        self.root.join(fold)
    }

    pub fn corpus_path(&self, fold: &str, split: SourceSplit, variant: Variant) -> PathBuf {
        self.fold_dir(fold)
            .join(format!("instances_{}_{}.json", split, variant))
    }

    /// Every variant written per fold and split, in processing order.
    pub fn variants(shots: &[usize]) -> Vec<Variant> {
        [Variant::Base, Variant::Novel]
            .into_iter()
            .chain(shots.iter().map(|&k| Variant::NovelShot(k)))
            .collect()
    }
}
