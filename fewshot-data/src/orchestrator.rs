//! Drives filtering and sampling over every fold and persists the results.

use crate::{
    common::*,
    corpus::Corpus,
    error::FoldError,
    filter::filter_categories,
    fold::{CategoryUniverse, Fold, FoldSpec},
    layout::{OutputLayout, SourceSplit, Variant},
    sampler::{sample_k_shot, Shortfall},
};
use rayon::prelude::*;

/// The shot counts of the few-shot protocol.
pub const DEFAULT_SHOTS: [usize; 4] = [1, 3, 5, 10];

/// A source split corpus, or the reason it failed to load.
#[derive(Debug, Clone)]
pub enum SourceCorpus {
    Loaded(Arc<Corpus>),
    Failed(String),
}

/// The source corpora shared read-only by all folds.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    splits: Vec<(SourceSplit, SourceCorpus)>,
}

impl Sources {
    /// Loads each split file once.
    ///
    /// A split that fails to load is kept as a failure so that every fold
    /// reports it, rather than aborting the run here.
    pub fn load<P>(files: &[(SourceSplit, P)], sanitize: bool) -> Self
    where
        P: AsRef<Path>,
    {
        let splits = files
            .iter()
            .map(|(split, path)| {
                let path = path.as_ref();
                info!("loading {} annotations from '{}'", split, path.display());

                let result = if sanitize {
                    Corpus::load_sanitized(path)
                } else {
                    Corpus::load(path)
                };
                let source = match result {
                    Ok(corpus) => {
                        info!(
                            "{}: {} images, {} annotations, {} categories",
                            split,
                            corpus.images().len(),
                            corpus.annotations().len(),
                            corpus.categories().len()
                        );
                        SourceCorpus::Loaded(Arc::new(corpus))
                    }
                    Err(err) => {
                        log::error!("failed to load {} annotations: {}", split, err);
                        SourceCorpus::Failed(err.to_string())
                    }
                };
                (*split, source)
            })
            .collect();

        Self { splits }
    }

    pub fn push(&mut self, split: SourceSplit, corpus: Corpus) {
        self.splits
            .push((split, SourceCorpus::Loaded(Arc::new(corpus))));
    }

    pub fn splits(&self) -> &[(SourceSplit, SourceCorpus)] {
        &self.splits
    }

    /// The first successfully loaded corpus, preferring the training split.
    pub fn primary(&self) -> Option<&Arc<Corpus>> {
        self.splits
            .iter()
            .sorted_by_key(|(split, _)| *split)
            .find_map(|(_, source)| match source {
                SourceCorpus::Loaded(corpus) => Some(corpus),
                SourceCorpus::Failed(_) => None,
            })
    }
}

/// Options of a fold building run.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub layout: OutputLayout,
    pub shots: Vec<usize>,
    pub seed: u64,
    /// Processes folds on the rayon thread pool.
    pub parallel: bool,
}

impl BuildPlan {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: OutputLayout::new(output_dir),
            shots: DEFAULT_SHOTS.to_vec(),
            seed: 0,
            parallel: false,
        }
    }
}

/// A persisted corpus.
#[derive(Debug, Clone, Serialize)]
pub struct OutputRecord {
    pub split: SourceSplit,
    pub variant: Variant,
    pub path: PathBuf,
    pub num_images: usize,
    pub num_annotations: usize,
    pub num_categories: usize,
}

/// A shortfall met while sampling one k-shot subset.
#[derive(Debug, Clone, Serialize)]
pub struct ShotShortfall {
    pub split: SourceSplit,
    #[serde(flatten)]
    pub shortfall: Shortfall,
}

/// The outputs of a successfully built fold.
#[derive(Debug, Clone, Serialize)]
pub struct FoldReport {
    pub fold: String,
    pub num_base_categories: usize,
    pub num_novel_categories: usize,
    pub outputs: Vec<OutputRecord>,
    pub shortfalls: Vec<ShotShortfall>,
}

/// The result of one fold.
#[derive(Debug)]
pub struct FoldOutcome {
    pub fold: String,
    pub result: Result<FoldReport, FoldError>,
}

/// Outcomes of all folds, in definition order.
#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: Vec<FoldOutcome>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    pub fn reports(&self) -> impl Iterator<Item = &FoldReport> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &FoldError)> {
        self.outcomes.iter().filter_map(|outcome| {
            outcome
                .result
                .as_ref()
                .err()
                .map(|err| (outcome.fold.as_str(), err))
        })
    }

    /// Logs one line per fold and every failure.
    pub fn log(&self) {
        self.outcomes.iter().for_each(|outcome| match &outcome.result {
            Ok(report) => info!(
                "{}: wrote {} files, {} shortfalls",
                outcome.fold,
                report.outputs.len(),
                report.shortfalls.len()
            ),
            Err(err) => log::error!("{}: failed: {}", outcome.fold, err),
        });
    }
}

/// Builds every fold from the source corpora.
///
/// A failing fold does not stop the others; its error is recorded in the
/// returned summary.
pub fn build_folds(
    sources: &Sources,
    folds: &[FoldSpec],
    universe: &CategoryUniverse,
    plan: &BuildPlan,
) -> RunSummary {
    let run = |spec: &FoldSpec| FoldOutcome {
        fold: spec.name.clone(),
        result: build_fold(sources, spec, universe, plan),
    };

    let outcomes: Vec<_> = if plan.parallel {
        folds.par_iter().map(run).collect()
    } else {
        folds.iter().map(run).collect()
    };

    RunSummary { outcomes }
}

/// Builds and persists all subsets of one fold.
pub fn build_fold(
    sources: &Sources,
    spec: &FoldSpec,
    universe: &CategoryUniverse,
    plan: &BuildPlan,
) -> Result<FoldReport, FoldError> {
    let fold = spec.resolve(universe)?;
    info!(
        "processing {}: {} base categories, {} novel categories",
        fold.name,
        fold.base.len(),
        fold.novel.len()
    );

    // every source must be usable before anything is written
    let corpora: Vec<(SourceSplit, &Corpus)> = sources
        .splits()
        .iter()
        .map(|(split, source)| match source {
            SourceCorpus::Loaded(corpus) => Ok((*split, &**corpus)),
            SourceCorpus::Failed(reason) => Err(FoldError::SourceUnavailable {
                split: split.to_string(),
                reason: reason.clone(),
            }),
        })
        .collect::<Result<_, _>>()?;

    let mut subsets = vec![];
    let mut shortfalls = vec![];
    for (split, corpus) in corpora {
        derive_subsets(&fold, split, corpus, plan, &mut subsets, &mut shortfalls)?;
    }

    let outputs = subsets
        .iter()
        .map(|(split, variant, corpus)| persist(&fold, *split, *variant, corpus, plan))
        .collect::<Result<_, _>>()?;

    Ok(FoldReport {
        fold: fold.name,
        num_base_categories: fold.base.len(),
        num_novel_categories: fold.novel.len(),
        outputs,
        shortfalls,
    })
}

/// Filters and samples one source split without touching the file system.
fn derive_subsets(
    fold: &Fold,
    split: SourceSplit,
    corpus: &Corpus,
    plan: &BuildPlan,
    subsets: &mut Vec<(SourceSplit, Variant, Corpus)>,
    shortfalls: &mut Vec<ShotShortfall>,
) -> Result<(), FoldError> {
    // novel objects must never appear in base images
    let base = filter_categories(corpus, &fold.base, true);
    // novel images may show base objects
    let novel = filter_categories(corpus, &fold.novel, false);
    fold.check_splits(split.as_str(), &base, &novel)?;

    let shots: Vec<_> = plan
        .shots
        .iter()
        .map(|&k| {
            let sampled = sample_k_shot(&novel, k, plan.seed);
            shortfalls.extend(
                sampled
                    .shortfalls
                    .into_iter()
                    .map(|shortfall| ShotShortfall { split, shortfall }),
            );
            (split, Variant::NovelShot(k), sampled.corpus)
        })
        .collect();

    subsets.push((split, Variant::Base, base));
    subsets.push((split, Variant::Novel, novel));
    subsets.extend(shots);

    Ok(())
}

fn persist(
    fold: &Fold,
    split: SourceSplit,
    variant: Variant,
    corpus: &Corpus,
    plan: &BuildPlan,
) -> Result<OutputRecord, FoldError> {
    let path = plan.layout.corpus_path(&fold.name, split, variant);
    corpus.save(&path)?;
    info!(
        "{} {} {}: {} images, {} annotations",
        fold.name,
        split,
        variant,
        corpus.images().len(),
        corpus.annotations().len()
    );

    Ok(OutputRecord {
        split,
        variant,
        path,
        num_images: corpus.images().len(),
        num_annotations: corpus.annotations().len(),
        num_categories: corpus.categories().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::corpus;

    fn small_universe() -> CategoryUniverse {
        CategoryUniverse::from_names((1..=4).map(|id| (id, format!("cat{}", id)))).unwrap()
    }

    fn spec(name: &str, novel: &[&str]) -> FoldSpec {
        FoldSpec {
            name: name.to_owned(),
            novel: novel.iter().map(|&name| name.to_owned()).collect(),
        }
    }

    #[test]
    fn failing_fold_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut sources = Sources::default();
        sources.push(
            SourceSplit::Train,
            corpus(4, &[(1, &[1]), (2, &[2, 3]), (3, &[4]), (4, &[3])]),
        );

        let folds = [
            spec("good", &["cat3"]),
            spec("bad", &["cat9"]),
            spec("also_good", &["cat4"]),
        ];
        let mut plan = BuildPlan::new(dir.path());
        plan.shots = vec![1];

        let summary = build_folds(&sources, &folds, &small_universe(), &plan);

        assert!(!summary.is_success());
        let failed: Vec<_> = summary.failures().map(|(fold, _)| fold).collect();
        assert_eq!(failed, ["bad"]);
        assert_eq!(summary.reports().count(), 2);
        assert!(dir.path().join("good/instances_train_novel_1shot.json").exists());
        assert!(dir.path().join("also_good/instances_train_base.json").exists());
        assert!(!dir.path().join("bad").exists());
    }

    #[test]
    fn unavailable_source_fails_every_fold() {
        let dir = tempfile::tempdir().unwrap();
        let sources = Sources::load(&[(SourceSplit::Train, dir.path().join("missing.json"))], false);
        let folds = [spec("a", &["cat1"]), spec("b", &["cat2"])];
        let summary = build_folds(&sources, &folds, &small_universe(), &BuildPlan::new(dir.path()));

        assert_eq!(summary.failures().count(), 2);
        assert!(summary
            .failures()
            .all(|(_, err)| matches!(err, FoldError::SourceUnavailable { .. })));
    }

    #[test]
    fn failed_fold_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let train_file = dir.path().join("train.json");
        corpus(4, &[(1, &[1]), (2, &[2, 3]), (3, &[4]), (4, &[3])])
            .save(&train_file)
            .unwrap();
        let sources = Sources::load(
            &[
                (SourceSplit::Train, train_file),
                (SourceSplit::Val, dir.path().join("missing.json")),
            ],
            false,
        );

        let out_dir = dir.path().join("out");
        let summary = build_folds(
            &sources,
            &[spec("f", &["cat3"])],
            &small_universe(),
            &BuildPlan::new(&out_dir),
        );

        assert!(matches!(
            summary.outcomes[0].result,
            Err(FoldError::SourceUnavailable { ref split, .. }) if split == "val"
        ));
        assert!(!out_dir.join("f").exists());
    }

    #[test]
    fn parallel_run_matches_sequential_run() {
        let mut sources = Sources::default();
        sources.push(
            SourceSplit::Train,
            corpus(4, &[(1, &[1]), (2, &[2, 3]), (3, &[4]), (4, &[3]), (5, &[1, 4])]),
        );
        let folds = [spec("a", &["cat1"]), spec("b", &["cat3", "cat4"])];

        let seq_dir = tempfile::tempdir().unwrap();
        let par_dir = tempfile::tempdir().unwrap();
        let seq_plan = BuildPlan::new(seq_dir.path());
        let par_plan = BuildPlan {
            parallel: true,
            ..BuildPlan::new(par_dir.path())
        };

        assert!(build_folds(&sources, &folds, &small_universe(), &seq_plan).is_success());
        let summary = build_folds(&sources, &folds, &small_universe(), &par_plan);
        let order: Vec<_> = summary.outcomes.iter().map(|o| o.fold.as_str()).collect();
        assert_eq!(order, ["a", "b"]);

        for report in summary.reports() {
            for output in &report.outputs {
                let relative = output.path.strip_prefix(par_dir.path()).unwrap();
                let lhs = fs::read(&output.path).unwrap();
                let rhs = fs::read(seq_dir.path().join(relative)).unwrap();
                assert_eq!(lhs, rhs, "{}", relative.display());
            }
        }
    }
}
