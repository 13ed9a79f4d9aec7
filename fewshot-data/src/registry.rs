//! Dataset names handed to the detection training framework.
//!
//! The framework keeps a global name to dataset registry. This module only
//! computes the entries; registering them is up to the caller.

use crate::{
    common::*,
    corpus::save_json,
    error::FoldError,
    layout::{OutputLayout, SourceSplit, Variant},
};

/// A named annotation file with the directory its image paths are relative to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub name: String,
    pub annotation_file: PathBuf,
    pub image_root: PathBuf,
}

/// Lists the datasets produced for the given folds.
///
/// Names follow `<prefix>_<fold>_<split>_<variant>`, for example
/// `vizwiz_OD25_0_train_novel_5shot`.
pub fn fold_datasets<S>(
    prefix: &str,
    folds: &[S],
    shots: &[usize],
    layout: &OutputLayout,
    image_root: &Path,
) -> Vec<DatasetEntry>
where
    S: AsRef<str>,
{
    let variants = OutputLayout::variants(shots);

    folds
        .iter()
        .flat_map(|fold| {
            let fold = fold.as_ref();
            variants.iter().flat_map(move |&variant| {
                SourceSplit::ALL
                    .into_iter()
                    .map(move |split| (fold, split, variant))
            })
        })
        .map(|(fold, split, variant)| DatasetEntry {
            name: dataset_name(prefix, fold, split, variant),
            annotation_file: layout.corpus_path(fold, split, variant),
            image_root: image_root.to_owned(),
        })
        .collect()
}

/// Lists the unsplit source datasets, named `<prefix>_train` and `<prefix>_val`.
pub fn source_datasets<P>(prefix: &str, files: &[(SourceSplit, P)], image_root: &Path) -> Vec<DatasetEntry>
where
    P: AsRef<Path>,
{
    files
        .iter()
        .map(|(split, file)| DatasetEntry {
            name: format!("{}_{}", prefix, split),
            annotation_file: file.as_ref().to_owned(),
            image_root: image_root.to_owned(),
        })
        .collect()
}

pub fn dataset_name(prefix: &str, fold: &str, split: SourceSplit, variant: Variant) -> String {
    format!("{}_{}_{}_{}", prefix, fold, split, variant)
}

/// Writes entries as a pretty-printed JSON manifest, replacing the file atomically.
pub fn write_manifest(path: impl AsRef<Path>, entries: &[DatasetEntry]) -> Result<(), FoldError> {
    save_json(path, entries, true)
}
