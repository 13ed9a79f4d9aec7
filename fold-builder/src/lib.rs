//! The fold building program for the few-shot VizWiz protocol.

pub mod common;
pub mod config;

use crate::{common::*, config::UniverseKind};
use fewshot_data::{
    build_folds, fold_datasets, save_json, source_datasets, write_manifest, BuildPlan,
    CategoryUniverse, FoldReport, FoldSpec, OutputLayout, RunSummary, Sources,
};

/// The file name of the run summary written to the output directory.
pub const SUMMARY_FILE_NAME: &str = "run_summary.json";

/// One fold entry of the run summary file.
#[derive(Debug, Serialize)]
struct SummaryEntry<'a> {
    fold: &'a str,
    error: Option<String>,
    report: Option<&'a FoldReport>,
}

/// The entry of fold building program.
pub fn start(config: &config::Config) -> Result<RunSummary> {
    let output_dir = &config.output.dir;

    // create dirs and save config
    {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create '{}'", output_dir.display()))?;
        save_json(output_dir.join("config.json5"), config, true)?;
    }

    // load source corpora once for all folds
    let files = config.dataset.source_files();
    let sources = Sources::load(&files, config.dataset.sanitize);

    let universe = match config.dataset.universe {
        UniverseKind::Vizwiz => CategoryUniverse::vizwiz(),
        UniverseKind::Corpus => {
            let corpus = sources
                .primary()
                .ok_or_else(|| format_err!("no source corpus could be loaded"))?;
            CategoryUniverse::from_corpus(corpus)?
        }
    };

    let folds = match &config.folds.folds_file {
        Some(path) => FoldSpec::load_file(path)
            .with_context(|| format!("failed to load folds file '{}'", path.display()))?,
        None => FoldSpec::od25(),
    };
    ensure!(!folds.is_empty(), "no folds are defined");
    info!(
        "building {} folds over {} categories",
        folds.len(),
        universe.len()
    );

    let plan = BuildPlan {
        layout: OutputLayout::new(output_dir),
        shots: config.sampling.shots.clone(),
        seed: config.sampling.seed,
        parallel: config.output.parallel,
    };
    let summary = {
        let _span = info_span!("build_folds").entered();
        build_folds(&sources, &folds, &universe, &plan)
    };
    summary.log();

    save_summary(&output_dir.join(SUMMARY_FILE_NAME), &summary)?;

    if let Some(registry) = &config.output.registry {
        let built: Vec<_> = summary.reports().map(|report| report.fold.as_str()).collect();
        let entries: Vec<_> = source_datasets(&registry.prefix, &files, &config.dataset.image_root)
            .into_iter()
            .chain(fold_datasets(
                &registry.prefix,
                &built,
                &plan.shots,
                &plan.layout,
                &config.dataset.image_root,
            ))
            .collect();
        write_manifest(&registry.manifest_file, &entries)?;
        info!(
            "wrote {} dataset entries to '{}'",
            entries.len(),
            registry.manifest_file.display()
        );
    }

    Ok(summary)
}

fn save_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let entries: Vec<_> = summary
        .outcomes
        .iter()
        .map(|outcome| {
            let (error, report) = match &outcome.result {
                Ok(report) => (None, Some(report)),
                Err(err) => (Some(err.to_string()), None),
            };
            SummaryEntry {
                fold: &outcome.fold,
                error,
                report,
            }
        })
        .collect();
    save_json(path, &entries, true)
        .with_context(|| format!("failed to write '{}'", path.display()))?;
    Ok(())
}
