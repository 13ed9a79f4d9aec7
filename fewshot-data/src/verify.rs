//! Checks of fold outputs already written to disk.

use crate::{
    common::*,
    corpus::{CategoryId, Corpus},
    fold::{CategoryUniverse, FoldSpec},
    layout::{OutputLayout, SourceSplit, Variant},
};

/// What is wrong with one fold or one of its output files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
    /// The fold definition does not resolve against the universe.
    InvalidFold { reason: String },
    Missing,
    /// The file cannot be parsed or has dangling references.
    Unloadable { reason: String },
    /// Categories outside the fold side the file belongs to.
    LeakedCategories { categories: Vec<CategoryId> },
    CategoryCount { expected: usize, found: usize },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFold { reason } => write!(f, "invalid fold: {}", reason),
            Self::Missing => write!(f, "file is missing"),
            Self::Unloadable { reason } => write!(f, "cannot be loaded: {}", reason),
            Self::LeakedCategories { categories } => {
                write!(f, "contains categories {:?} of the other side", categories)
            }
            Self::CategoryCount { expected, found } => {
                write!(f, "has {} categories, expected {}", found, expected)
            }
        }
    }
}

/// A problem located at a fold, and at a file if it concerns one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputIssue {
    pub fold: String,
    pub split: Option<SourceSplit>,
    pub variant: Option<Variant>,
    pub path: Option<PathBuf>,
    pub problem: Problem,
}

/// An output file that passed every check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedOutput {
    pub fold: String,
    pub split: SourceSplit,
    pub variant: Variant,
    pub path: PathBuf,
    pub num_images: usize,
    pub num_annotations: usize,
    pub num_categories: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerifyReport {
    pub verified: Vec<VerifiedOutput>,
    pub issues: Vec<OutputIssue>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Checks every file a run over `folds` and `shots` should have written.
///
/// Each file must load as a valid corpus, define exactly as many
/// categories as its fold side and use no category of the other side.
pub fn verify_outputs(
    layout: &OutputLayout,
    folds: &[FoldSpec],
    universe: &CategoryUniverse,
    shots: &[usize],
) -> VerifyReport {
    let mut report = VerifyReport::default();

    for spec in folds {
        let fold = match spec.resolve(universe) {
            Ok(fold) => fold,
            Err(err) => {
                report.issues.push(OutputIssue {
                    fold: spec.name.clone(),
                    split: None,
                    variant: None,
                    path: None,
                    problem: Problem::InvalidFold {
                        reason: err.to_string(),
                    },
                });
                continue;
            }
        };

        for split in SourceSplit::ALL {
            for variant in OutputLayout::variants(shots) {
                let path = layout.corpus_path(&fold.name, split, variant);
                let expected = match variant {
                    Variant::Base => &fold.base,
                    Variant::Novel | Variant::NovelShot(_) => &fold.novel,
                };

                let mut issue = |problem| {
                    report.issues.push(OutputIssue {
                        fold: fold.name.clone(),
                        split: Some(split),
                        variant: Some(variant),
                        path: Some(path.clone()),
                        problem,
                    })
                };

                if !path.exists() {
                    issue(Problem::Missing);
                    continue;
                }

                let corpus = match Corpus::load(&path) {
                    Ok(corpus) => corpus,
                    Err(err) => {
                        issue(Problem::Unloadable {
                            reason: err.to_string(),
                        });
                        continue;
                    }
                };

                let used: BTreeSet<_> = corpus
                    .category_ids()
                    .union(&corpus.annotated_category_ids())
                    .copied()
                    .collect();
                let leaked: Vec<_> = used.difference(expected).copied().collect();
                let num_categories = corpus.categories().len();

                let mut clean = true;
                if !leaked.is_empty() {
                    issue(Problem::LeakedCategories { categories: leaked });
                    clean = false;
                }
                if num_categories != expected.len() {
                    issue(Problem::CategoryCount {
                        expected: expected.len(),
                        found: num_categories,
                    });
                    clean = false;
                }

                if clean {
                    report.verified.push(VerifiedOutput {
                        fold: fold.name.clone(),
                        split,
                        variant,
                        path,
                        num_images: corpus.images().len(),
                        num_annotations: corpus.annotations().len(),
                        num_categories,
                    });
                }
            }
        }
    }

    if !report.is_clean() {
        warn!("{} problems found in fold outputs", report.issues.len());
    }

    report
}
