//! Error types of the fold building pipeline.

use crate::{
    common::*,
    corpus::{AnnotationId, CategoryId, ImageId},
};

/// The errors raised while loading, partitioning and persisting corpora.
#[derive(Debug, thiserror::Error)]
pub enum FoldError {
    /// The corpus or definition file is malformed or incomplete.
    #[error("failed to parse {origin}: {reason}")]
    Parse { origin: String, reason: String },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An annotation points to an image or category absent from its corpus.
    #[error("annotation {annotation_id} references {target}")]
    ReferentialIntegrity {
        annotation_id: AnnotationId,
        target: DanglingRef,
    },

    /// Stable-prefix sampling found fewer candidates than requested.
    #[error(
        "category {category_id} has only {available} qualifying annotations, but {requested} are requested"
    )]
    InsufficientSamples {
        category_id: CategoryId,
        available: usize,
        requested: usize,
    },

    /// Base and novel categories of a fold overlap.
    #[error("category leakage in fold '{fold}' ({stage}): categories {categories:?}")]
    LeakageDetected {
        fold: String,
        stage: String,
        categories: Vec<CategoryId>,
    },

    #[error("invalid fold '{fold}': {reason}")]
    InvalidFold { fold: String, reason: String },

    /// A source corpus required by the fold could not be loaded.
    #[error("source corpus '{split}' is unavailable: {reason}")]
    SourceUnavailable { split: String, reason: String },
}

impl FoldError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_owned(),
            source,
        }
    }

    pub(crate) fn parse(origin: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::Parse {
            origin: origin.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// The dangling side of a broken annotation reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingRef {
    MissingImage(ImageId),
    UndefinedCategory(CategoryId),
}

impl fmt::Display for DanglingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MissingImage(id) => write!(f, "missing image {}", id),
            Self::UndefinedCategory(id) => write!(f, "undefined category {}", id),
        }
    }
}
