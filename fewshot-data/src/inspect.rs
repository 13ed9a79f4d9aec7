//! Sanity checks of annotation files.

use crate::{
    common::*,
    corpus::{AnnotationId, CategoryId, ImageId, RawCorpus},
};

/// Statistics and problems found in a raw corpus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusReport {
    pub num_images: usize,
    pub num_annotations: usize,
    pub num_categories: usize,
    pub min_category_id: Option<CategoryId>,
    pub max_category_id: Option<CategoryId>,
    /// Ids missing between the smallest and largest category id.
    pub category_id_gaps: Vec<CategoryId>,
    /// Category ids outside the accepted id range.
    pub out_of_range_category_ids: Vec<CategoryId>,
    pub duplicated_image_ids: Vec<ImageId>,
    pub duplicated_annotation_ids: Vec<AnnotationId>,
    pub duplicated_category_ids: Vec<CategoryId>,
    /// Category ids used by annotations but not defined.
    pub undefined_category_ids: Vec<CategoryId>,
    /// Image ids referenced by annotations but not defined.
    pub missing_image_ids: Vec<ImageId>,
    pub categories_without_annotations: Vec<CategoryId>,
    pub images_without_annotations: usize,
    /// Annotations whose box has a non-positive side.
    pub degenerate_boxes: Vec<AnnotationId>,
    pub annotations_per_category: BTreeMap<CategoryId, usize>,
    /// Training index of each defined category id, `0..num_categories` in
    /// ascending id order, as the detection framework assigns them.
    pub contiguous_category_ids: BTreeMap<CategoryId, usize>,
}

impl CorpusReport {
    /// Inspects a corpus, accepting category ids within `valid_ids`.
    pub fn inspect(raw: &RawCorpus, valid_ids: std::ops::RangeInclusive<CategoryId>) -> Self {
        let category_ids: BTreeSet<_> = raw.categories.iter().map(|cat| cat.id).collect();
        let image_ids: HashSet<_> = raw.images.iter().map(|img| img.id).collect();

        let annotations_per_category: BTreeMap<CategoryId, usize> = raw
            .annotations
            .iter()
            .map(|ann| ann.category_id)
            .counts()
            .into_iter()
            .collect();
        let annotated_images: HashSet<_> = raw.annotations.iter().map(|ann| ann.image_id).collect();

        let category_id_gaps = match (category_ids.iter().next(), category_ids.iter().next_back()) {
            (Some(&min), Some(&max)) => (min..=max)
                .filter(|id| !category_ids.contains(id))
                .collect(),
            _ => vec![],
        };

        let contiguous_category_ids = category_ids
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index))
            .collect();

        Self {
            num_images: raw.images.len(),
            num_annotations: raw.annotations.len(),
            num_categories: raw.categories.len(),
            min_category_id: category_ids.iter().next().copied(),
            max_category_id: category_ids.iter().next_back().copied(),
            category_id_gaps,
            out_of_range_category_ids: category_ids
                .iter()
                .filter(|&&id| !valid_ids.contains(&id))
                .copied()
                .collect(),
            duplicated_image_ids: duplicates(raw.images.iter().map(|img| img.id)),
            duplicated_annotation_ids: duplicates(raw.annotations.iter().map(|ann| ann.id)),
            duplicated_category_ids: duplicates(raw.categories.iter().map(|cat| cat.id)),
            undefined_category_ids: annotations_per_category
                .keys()
                .filter(|&&id| !category_ids.contains(&id))
                .copied()
                .collect(),
            missing_image_ids: annotated_images
                .iter()
                .filter(|&&id| !image_ids.contains(&id))
                .copied()
                .sorted()
                .collect(),
            categories_without_annotations: category_ids
                .iter()
                .filter(|&&id| !annotations_per_category.contains_key(&id))
                .copied()
                .collect(),
            images_without_annotations: image_ids
                .iter()
                .filter(|&&id| !annotated_images.contains(&id))
                .count(),
            degenerate_boxes: raw
                .annotations
                .iter()
                .filter(|ann| !ann.bbox.is_valid())
                .map(|ann| ann.id)
                .collect(),
            annotations_per_category,
            contiguous_category_ids,
        }
    }

    /// Returns true if the corpus cannot be used as is.
    pub fn has_critical_issues(&self) -> bool {
        !(self.undefined_category_ids.is_empty()
            && self.missing_image_ids.is_empty()
            && self.duplicated_image_ids.is_empty()
            && self.duplicated_annotation_ids.is_empty()
            && self.duplicated_category_ids.is_empty())
    }

    /// Ratio between the most and the least annotated category.
    pub fn imbalance_ratio(&self) -> Option<f64> {
        let min = self.annotations_per_category.values().min()?;
        let max = self.annotations_per_category.values().max()?;
        Some(*max as f64 / *min as f64)
    }

    /// Human readable warnings, one per problem kind.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = vec![];
        let mut check = |cond: bool, msg: String| {
            if cond {
                issues.push(msg);
            }
        };

        check(
            !self.undefined_category_ids.is_empty(),
            format!("annotations use undefined categories {:?}", self.undefined_category_ids),
        );
        check(
            !self.missing_image_ids.is_empty(),
            format!(
                "annotations reference {} missing images",
                self.missing_image_ids.len()
            ),
        );
        check(
            !self.duplicated_image_ids.is_empty(),
            format!("duplicated image ids {:?}", self.duplicated_image_ids),
        );
        check(
            !self.duplicated_annotation_ids.is_empty(),
            format!("duplicated annotation ids {:?}", self.duplicated_annotation_ids),
        );
        check(
            !self.duplicated_category_ids.is_empty(),
            format!("duplicated category ids {:?}", self.duplicated_category_ids),
        );
        check(
            !self.out_of_range_category_ids.is_empty(),
            format!("category ids out of range {:?}", self.out_of_range_category_ids),
        );
        check(
            !self.category_id_gaps.is_empty(),
            format!("gaps in category ids {:?}", self.category_id_gaps),
        );
        check(
            !self.degenerate_boxes.is_empty(),
            format!("{} degenerate boxes", self.degenerate_boxes.len()),
        );
        check(
            !self.categories_without_annotations.is_empty(),
            format!(
                "{} categories without annotations",
                self.categories_without_annotations.len()
            ),
        );
        check(
            self.images_without_annotations > 0,
            format!("{} images without annotations", self.images_without_annotations),
        );

        issues
    }
}

fn duplicates<T>(ids: impl Iterator<Item = T>) -> Vec<T>
where
    T: Copy + Ord + std::hash::Hash,
{
    ids.duplicates().sorted().collect()
}
