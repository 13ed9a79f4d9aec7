//! Category-based corpus filtering.

use crate::{
    common::*,
    corpus::{CategoryId, Corpus, ImageId},
};

/// Restricts a corpus to the given categories.
///
/// Only annotations of `category_ids` are kept, and only images referenced
/// by those annotations. With `leakage_guard` set, an image is dropped
/// entirely if the source corpus annotates anything outside `category_ids`
/// on it, even when it also carries in-set annotations.
pub fn filter_categories(
    corpus: &Corpus,
    category_ids: &BTreeSet<CategoryId>,
    leakage_guard: bool,
) -> Corpus {
    let categories: IndexMap<_, _> = corpus
        .categories()
        .iter()
        .filter(|&(id, _)| category_ids.contains(id))
        .map(|(&id, cat)| (id, cat.clone()))
        .collect();

    let mut image_ids: HashSet<ImageId> = corpus
        .annotations()
        .iter()
        .filter(|ann| category_ids.contains(&ann.category_id))
        .map(|ann| ann.image_id)
        .collect();

    if leakage_guard {
        corpus
            .annotations()
            .iter()
            .filter(|ann| !category_ids.contains(&ann.category_id))
            .for_each(|ann| {
                image_ids.remove(&ann.image_id);
            });
    }

    // the image check is a no-op without the leakage guard
    let annotations: Vec<_> = corpus
        .annotations()
        .iter()
        .filter(|ann| {
            category_ids.contains(&ann.category_id) && image_ids.contains(&ann.image_id)
        })
        .cloned()
        .collect();

    let images: IndexMap<_, _> = corpus
        .images()
        .iter()
        .filter(|&(id, _)| image_ids.contains(id))
        .map(|(&id, image)| (id, image.clone()))
        .collect();

    Corpus::from_parts(images, annotations, categories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{corpus, ids};

    #[test]
    fn mixed_image_is_excluded_from_guarded_base_only() {
        let corpus = corpus(10, &[(1, &[3, 5]), (2, &[5]), (3, &[7]), (4, &[1, 2])]);
        let novel = ids(&[3, 7]);
        let base = ids(&[1, 2, 4, 5, 6, 8, 9, 10]);

        let base_split = filter_categories(&corpus, &base, true);
        assert_eq!(base_split.image_ids(), ids(&[2, 4]));
        assert_eq!(base_split.annotated_category_ids(), ids(&[1, 2, 5]));
        assert_eq!(base_split.category_ids(), base);

        let novel_split = filter_categories(&corpus, &novel, false);
        assert_eq!(novel_split.image_ids(), ids(&[1, 3]));
        assert_eq!(novel_split.annotated_category_ids(), ids(&[3, 7]));
        assert_eq!(novel_split.annotations().len(), 2);
    }

    #[test]
    fn unguarded_filter_keeps_mixed_images() {
        let corpus = corpus(10, &[(1, &[3, 5]), (2, &[5])]);
        let split = filter_categories(&corpus, &ids(&[5]), false);
        assert_eq!(split.image_ids(), ids(&[1, 2]));
        assert!(split.annotations().iter().all(|ann| ann.category_id == 5));
    }

    #[test]
    fn filter_preserves_source_order() {
        let corpus = corpus(10, &[(9, &[1]), (2, &[1]), (5, &[1])]);
        let split = filter_categories(&corpus, &ids(&[1]), true);
        let order: Vec<_> = split.images().keys().copied().collect();
        assert_eq!(order, vec![9, 2, 5]);
    }
}
