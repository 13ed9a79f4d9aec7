use anyhow::{ensure, Result};
use fewshot_data::{
    build_folds, filter_categories, sample_k_shot, sample_stable_prefix, verify_outputs, BuildPlan,
    CategoryUniverse, Corpus, FoldError, FoldSpec, OutputLayout, Problem, SourceSplit, Sources,
    Variant,
};
use itertools::Itertools;
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

lazy_static::lazy_static! {
    static ref DATA_DIR: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("data");
    static ref SCENARIO_FILE: PathBuf = DATA_DIR.join("scenario.json");
}

fn ids(ids: &[u64]) -> BTreeSet<u64> {
    ids.iter().copied().collect()
}

fn image_ids(corpus: &Corpus) -> Vec<u64> {
    corpus.images().keys().copied().collect()
}

fn scenario_fold() -> FoldSpec {
    FoldSpec {
        name: "scenario".to_owned(),
        novel: vec!["dog".to_owned(), "remote".to_owned()],
    }
}

#[test]
fn mixed_image_is_kept_out_of_base_only() -> Result<()> {
    let corpus = Corpus::load(&*SCENARIO_FILE)?;
    let universe = CategoryUniverse::from_corpus(&corpus)?;
    let fold = scenario_fold().resolve(&universe)?;
    assert_eq!(fold.novel, ids(&[3, 7]));
    assert_eq!(fold.base, ids(&[1, 2, 4, 5, 6, 8, 9, 10]));

    let base = filter_categories(&corpus, &fold.base, true);
    let novel = filter_categories(&corpus, &fold.novel, false);

    // image 1 shows a dog and a mug
    assert_eq!(image_ids(&base), [2, 3, 6, 7, 8, 10]);
    assert_eq!(image_ids(&novel), [1, 4, 5, 9]);
    assert!(base
        .annotations()
        .iter()
        .all(|ann| fold.base.contains(&ann.category_id)));
    assert!(novel
        .annotations()
        .iter()
        .all(|ann| fold.novel.contains(&ann.category_id)));

    fold.check_splits("train", &base, &novel)?;
    Ok(())
}

#[test]
fn filtering_is_idempotent() -> Result<()> {
    let corpus = Corpus::load(&*SCENARIO_FILE)?;
    let targets = [ids(&[3, 7]), ids(&[1, 2, 4, 5, 6, 8, 9, 10]), ids(&[5, 9])];

    for target in &targets {
        for guard in [true, false] {
            let once = filter_categories(&corpus, target, guard);
            let twice = filter_categories(&once, target, guard);
            assert_eq!(once.to_json_vec()?, twice.to_json_vec()?);
        }
    }
    Ok(())
}

#[test]
fn stable_prefix_selects_first_pair() -> Result<()> {
    let corpus = Corpus::load(&*SCENARIO_FILE)?;
    // category 9 is annotated on images 6 and 7
    let one = sample_stable_prefix(&corpus, &ids(&[9]), 1)?;
    assert_eq!(image_ids(&one), [6]);
    assert_eq!(
        one.annotations().iter().map(|ann| ann.id).collect::<Vec<_>>(),
        [8]
    );

    let err = sample_stable_prefix(&corpus, &ids(&[9]), 5).unwrap_err();
    assert!(matches!(
        err,
        FoldError::InsufficientSamples {
            category_id: 9,
            available: 2,
            requested: 5
        }
    ));
    Ok(())
}

#[test]
fn sampling_respects_shot_bound() -> Result<()> {
    let corpus = Corpus::load(&*SCENARIO_FILE)?;
    let novel = filter_categories(&corpus, &ids(&[3, 7]), false);

    for k in [1, 3, 5, 10] {
        let sampled = sample_k_shot(&novel, k, 7);
        let mut per_category: HashMap<u64, HashSet<u64>> = HashMap::new();
        sampled.corpus.annotations().iter().for_each(|ann| {
            per_category
                .entry(ann.category_id)
                .or_default()
                .insert(ann.image_id);
        });

        for (&category_id, images) in &per_category {
            ensure!(images.len() <= k, "category {} exceeds {} shots", category_id, k);
        }
        if k == 1 {
            assert!(sampled.shortfalls.is_empty());
        } else {
            // dog and remote are both on two images
            assert_eq!(sampled.shortfalls.len(), 2);
        }
    }
    Ok(())
}

#[test]
fn run_writes_consistent_fold_matrix() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let sources = Sources::load(
        &[
            (SourceSplit::Train, SCENARIO_FILE.as_path()),
            (SourceSplit::Val, SCENARIO_FILE.as_path()),
        ],
        false,
    );
    let universe = CategoryUniverse::from_corpus(sources.primary().unwrap())?;
    let folds = [
        scenario_fold(),
        FoldSpec {
            name: "second".to_owned(),
            novel: vec!["mug".to_owned(), "table".to_owned(), "toy".to_owned()],
        },
    ];
    let plan = BuildPlan {
        seed: 42,
        ..BuildPlan::new(dir.path())
    };

    let summary = build_folds(&sources, &folds, &universe, &plan);
    assert!(summary.is_success());

    let layout = OutputLayout::new(dir.path());
    for (spec, report) in folds.iter().zip(summary.reports()) {
        let fold = spec.resolve(&universe)?;
        // (base + novel + 4 shots) x 2 splits
        assert_eq!(report.outputs.len(), 12);

        for split in SourceSplit::ALL {
            for variant in OutputLayout::variants(&plan.shots) {
                let path = layout.corpus_path(&fold.name, split, variant);
                // loading checks every reference
                let corpus = Corpus::load(&path)?;
                let allowed = match variant {
                    Variant::Base => &fold.base,
                    Variant::Novel | Variant::NovelShot(_) => &fold.novel,
                };
                ensure!(
                    corpus.annotated_category_ids().is_subset(allowed),
                    "{} leaks categories",
                    path.display()
                );
            }
        }
    }
    Ok(())
}

#[test]
fn verify_flags_damaged_run_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let sources = Sources::load(
        &[
            (SourceSplit::Train, SCENARIO_FILE.as_path()),
            (SourceSplit::Val, SCENARIO_FILE.as_path()),
        ],
        false,
    );
    let universe = CategoryUniverse::from_corpus(sources.primary().unwrap())?;
    let second = FoldSpec {
        name: "second".to_owned(),
        novel: vec!["mug".to_owned(), "table".to_owned(), "toy".to_owned()],
    };
    let folds = [scenario_fold(), second.clone()];
    let plan = BuildPlan {
        seed: 42,
        ..BuildPlan::new(dir.path())
    };
    assert!(build_folds(&sources, &folds, &universe, &plan).is_success());

    // a fresh run passes every check
    let layout = OutputLayout::new(dir.path());
    let report = verify_outputs(&layout, &folds, &universe, &plan.shots);
    assert!(report.is_clean(), "{:?}", report.issues);
    assert_eq!(report.verified.len(), 24);
    for output in report.verified.iter().filter(|output| output.fold == "scenario") {
        let expected = if output.variant == Variant::Base { 8 } else { 2 };
        assert_eq!(output.num_categories, expected);
    }

    // drop one k-shot file and overwrite a base file with novel content
    let missing = layout.corpus_path("scenario", SourceSplit::Train, Variant::NovelShot(5));
    fs::remove_file(&missing)?;
    let damaged = layout.corpus_path("second", SourceSplit::Val, Variant::Base);
    fs::copy(
        layout.corpus_path("second", SourceSplit::Val, Variant::Novel),
        &damaged,
    )?;
    let unknown = FoldSpec {
        name: "unknown".to_owned(),
        novel: vec!["zebra".to_owned()],
    };
    let folds = [scenario_fold(), second.clone(), unknown];

    let report = verify_outputs(&layout, &folds, &universe, &plan.shots);
    assert_eq!(report.verified.len(), 22);

    let problems = report
        .issues
        .iter()
        .map(|issue| ((issue.fold.as_str(), issue.path.clone()), &issue.problem))
        .into_group_map();
    assert_eq!(problems.len(), 3);
    assert_eq!(
        problems[&("scenario", Some(missing))],
        [&Problem::Missing]
    );

    let novel_ids: Vec<_> = second.resolve(&universe)?.novel.into_iter().collect();
    assert_eq!(
        problems[&("second", Some(damaged))],
        [
            &Problem::LeakedCategories {
                categories: novel_ids
            },
            &Problem::CategoryCount {
                expected: 7,
                found: 3
            },
        ]
    );
    assert!(matches!(
        problems[&("unknown", None)].as_slice(),
        [Problem::InvalidFold { .. }]
    ));
    Ok(())
}
