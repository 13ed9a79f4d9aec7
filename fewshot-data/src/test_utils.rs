//! Corpus fixtures shared by unit tests.

use crate::{
    common::*,
    corpus::{Annotation, BBox, Category, Corpus, RawCorpus},
};

/// Builds a corpus with categories `1..=num_categories`.
///
/// Each entry `(image_id, cats)` adds an image annotated once per listed
/// category. Annotation ids count up from 1 in listing order.
pub fn corpus(num_categories: u64, images: &[(u64, &[u64])]) -> Corpus {
    let mut annotations = vec![];
    for &(image_id, cats) in images {
        for &category_id in cats {
            annotations.push(Annotation {
                id: annotations.len() as u64 + 1,
                image_id,
                category_id,
                bbox: BBox::from([0.0, 0.0, 10.0, 10.0]),
                area: 100.0,
                extra: Default::default(),
            });
        }
    }

    let raw = RawCorpus {
        images: images
            .iter()
            .map(|&(id, _)| crate::corpus::Image {
                id,
                file_name: format!("images/train/{:08}.jpg", id),
                width: 64,
                height: 64,
                extra: Default::default(),
            })
            .collect(),
        annotations,
        categories: (1..=num_categories)
            .map(|id| Category {
                id,
                name: format!("cat{}", id),
                extra: Default::default(),
            })
            .collect(),
    };

    Corpus::from_raw(raw).unwrap()
}

pub fn ids(ids: &[u64]) -> BTreeSet<u64> {
    ids.iter().copied().collect()
}
