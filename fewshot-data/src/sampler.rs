//! K-shot subset sampling.

use crate::{
    common::*,
    corpus::{CategoryId, Corpus, ImageId},
    error::FoldError,
};

/// A category that could not supply the requested number of images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub category_id: CategoryId,
    pub available: usize,
    pub requested: usize,
}

/// The output of [sample_k_shot].
#[derive(Debug, Clone)]
pub struct Sampled {
    pub corpus: Corpus,
    pub shortfalls: Vec<Shortfall>,
}

/// Picks up to `k` images per category with a seeded random draw.
///
/// Categories are visited in ascending id order and candidate images are
/// sorted by id before drawing, so the selection depends only on the
/// corpus content, `k` and `seed`. A category with fewer than `k` images
/// contributes all of them and is reported as a [Shortfall]. The returned
/// corpus keeps every annotation of the selected images and all categories.
pub fn sample_k_shot(corpus: &Corpus, k: usize, seed: u64) -> Sampled {
    let mut groups: BTreeMap<CategoryId, BTreeSet<ImageId>> = corpus
        .categories()
        .keys()
        .map(|&id| (id, BTreeSet::new()))
        .collect();
    corpus.annotations().iter().for_each(|ann| {
        groups
            .entry(ann.category_id)
            .or_default()
            .insert(ann.image_id);
    });

    let mut rng = StdRng::seed_from_u64(seed);
    let mut shortfalls = vec![];
    let mut selected: HashSet<ImageId> = HashSet::new();

    for (category_id, image_ids) in groups {
        if image_ids.len() < k {
            warn!(
                "category {} only has {} images, using all of them for {}-shot",
                category_id,
                image_ids.len(),
                k
            );
            shortfalls.push(Shortfall {
                category_id,
                available: image_ids.len(),
                requested: k,
            });
            selected.extend(image_ids);
        } else {
            let candidates: Vec<_> = image_ids.into_iter().collect();
            selected.extend(candidates.choose_multiple(&mut rng, k).copied());
        }
    }

    let images: IndexMap<_, _> = corpus
        .images()
        .iter()
        .filter(|&(id, _)| selected.contains(id))
        .map(|(&id, image)| (id, image.clone()))
        .collect();
    let annotations: Vec<_> = corpus
        .annotations()
        .iter()
        .filter(|ann| selected.contains(&ann.image_id))
        .cloned()
        .collect();

    Sampled {
        corpus: Corpus::from_parts(images, annotations, corpus.categories().clone()),
        shortfalls,
    }
}

/// Picks exactly `k` annotations per requested category without randomness.
///
/// The candidates of each category are ordered by `(image_id, annotation id)`
/// and the first `k` are taken. Fails with
/// [InsufficientSamples](FoldError::InsufficientSamples) if any category has
/// fewer than `k` candidates. The result holds the chosen annotations only,
/// their images ordered by id and the requested categories ordered by id.
pub fn sample_stable_prefix(
    corpus: &Corpus,
    category_ids: &BTreeSet<CategoryId>,
    k: usize,
) -> Result<Corpus, FoldError> {
    let mut pools: BTreeMap<CategoryId, Vec<_>> = category_ids
        .iter()
        .map(|&id| (id, vec![]))
        .collect();
    corpus.annotations().iter().for_each(|ann| {
        if let Some(pool) = pools.get_mut(&ann.category_id) {
            pool.push(ann);
        }
    });

    let mut annotations = vec![];
    for (category_id, mut pool) in pools {
        if pool.len() < k {
            return Err(FoldError::InsufficientSamples {
                category_id,
                available: pool.len(),
                requested: k,
            });
        }
        pool.sort_by_key(|ann| (ann.image_id, ann.id));
        annotations.extend(pool.into_iter().take(k).cloned());
    }

    let image_ids: BTreeSet<ImageId> = annotations.iter().map(|ann| ann.image_id).collect();
    let images: IndexMap<_, _> = image_ids
        .into_iter()
        .map(|id| (id, corpus.images()[&id].clone()))
        .collect();
    let categories: IndexMap<_, _> = corpus
        .categories()
        .iter()
        .filter(|&(id, _)| category_ids.contains(id))
        .map(|(&id, cat)| (id, cat.clone()))
        .sorted_by_key(|&(id, _)| id)
        .collect();

    Ok(Corpus::from_parts(images, annotations, categories))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{corpus, ids};

    fn images_of(corpus: &Corpus, category_id: CategoryId) -> BTreeSet<ImageId> {
        corpus
            .annotations()
            .iter()
            .filter(|ann| ann.category_id == category_id)
            .map(|ann| ann.image_id)
            .collect()
    }

    /// Category 2 has 10 images, categories 1 and 3 have 20 with 10 shared,
    /// category 4 has 2.
    fn rich_corpus() -> Corpus {
        let pattern: [&[u64]; 4] = [&[1], &[2], &[1, 3], &[3]];
        let mut images: Vec<(u64, &[u64])> = (1..=40u64)
            .map(|id| (id, pattern[(id % 4) as usize]))
            .collect();
        images.push((41, &[4]));
        images.push((42, &[4]));
        corpus(4, &images)
    }

    #[test]
    fn at_most_k_images_per_category() {
        let corpus = rich_corpus();

        for k in [1, 3, 5, 10] {
            let Sampled {
                corpus: sampled,
                shortfalls,
            } = sample_k_shot(&corpus, k, 0);

            assert_eq!(images_of(&sampled, 2).len(), k);
            // category 1 and 3 share images, so the union can exceed k
            assert!(images_of(&sampled, 1).len() >= k);
            assert_eq!(images_of(&sampled, 4).len(), k.min(2));
            assert_eq!(sampled.category_ids(), corpus.category_ids());

            let expected: Vec<_> = (k > 2)
                .then(|| Shortfall {
                    category_id: 4,
                    available: 2,
                    requested: k,
                })
                .into_iter()
                .collect();
            assert_eq!(shortfalls, expected);
        }
    }

    #[test]
    fn sampling_is_reproducible() {
        let corpus = rich_corpus();
        let lhs = sample_k_shot(&corpus, 3, 7).corpus.to_json_vec().unwrap();
        let rhs = sample_k_shot(&corpus, 3, 7).corpus.to_json_vec().unwrap();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn empty_category_is_a_shortfall() {
        let corpus = corpus(3, &[(1, &[1]), (2, &[2])]);
        let sampled = sample_k_shot(&corpus, 1, 0);
        assert_eq!(
            sampled.shortfalls,
            vec![Shortfall {
                category_id: 3,
                available: 0,
                requested: 1
            }]
        );
        assert_eq!(sampled.corpus.image_ids(), ids(&[1, 2]));
    }

    #[test]
    fn stable_prefix_takes_first_image_and_annotation() {
        let corpus = corpus(10, &[(7, &[9]), (3, &[9, 9]), (5, &[2])]);
        let shot = sample_stable_prefix(&corpus, &ids(&[9]), 1).unwrap();

        assert_eq!(shot.annotations().len(), 1);
        let ann = &shot.annotations()[0];
        assert_eq!((ann.image_id, ann.id), (3, 2));
        assert_eq!(shot.image_ids(), ids(&[3]));
        assert_eq!(shot.category_ids(), ids(&[9]));
    }

    #[test]
    fn stable_prefix_refuses_short_categories() {
        let corpus = corpus(10, &[(1, &[9]), (2, &[9]), (3, &[2])]);
        let err = sample_stable_prefix(&corpus, &ids(&[9]), 5).unwrap_err();
        assert!(matches!(
            err,
            FoldError::InsufficientSamples {
                category_id: 9,
                available: 2,
                requested: 5
            }
        ));
    }
}
