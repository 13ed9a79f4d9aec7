use anyhow::{bail, ensure, format_err, Context, Error, Result};
use clap::Parser;
use fewshot_data::{
    fold_datasets, latest_values, sample_stable_prefix, source_datasets, verify_outputs,
    write_manifest, CategoryUniverse, Corpus, CorpusReport, DatasetEntry, FoldSpec, MetricRecord,
    MetricsTail, OutputLayout, RawCorpus, SourceSplit,
};
use itertools::Itertools as _;
use log::{error, info};
use prettytable::{cell, row, Table};
use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    str::FromStr,
    thread,
    time::Duration,
};

#[derive(Debug, Clone, Parser)]
/// Inspect corpora and fold outputs of the few-shot protocol.
enum Opts {
    /// Show the base/novel partition of each fold
    Folds {
        /// JSON5 fold definition file, the OD-25 folds by default
        #[clap(long)]
        folds_file: Option<PathBuf>,
        /// take category names from this annotation file instead of VizWiz
        #[clap(long)]
        annotation_file: Option<PathBuf>,
    },
    /// Check an annotation file for problems
    Check {
        /// annotation file
        annotation_file: PathBuf,
        /// largest valid category id
        #[clap(long, default_value = "100")]
        max_category_id: u64,
    },
    /// Write stable-prefix k-shot files for every fold
    Kshots {
        /// annotation file to sample from
        annotation_file: PathBuf,
        /// output directory
        out_root: PathBuf,
        /// JSON5 fold definition file, the OD-25 folds by default
        #[clap(long)]
        folds_file: Option<PathBuf>,
        /// comma separated shot counts
        #[clap(long, default_value = "1,3,5,10")]
        shots: ShotList,
    },
    /// List or save the dataset names of fold outputs
    Registry {
        /// directory the fold outputs are written to
        annotation_dir: PathBuf,
        /// directory image file names are relative to
        image_root: PathBuf,
        #[clap(long, default_value = "vizwiz")]
        prefix: String,
        /// JSON5 fold definition file, the OD-25 folds by default
        #[clap(long)]
        folds_file: Option<PathBuf>,
        /// comma separated shot counts
        #[clap(long, default_value = "1,3,5,10")]
        shots: ShotList,
        #[clap(long)]
        train_file: Option<PathBuf>,
        #[clap(long)]
        val_file: Option<PathBuf>,
        /// save the entries as JSON
        #[clap(long)]
        output_file: Option<PathBuf>,
    },
    /// Check the fold outputs written to a directory
    Verify {
        /// directory the fold outputs are written to
        annotation_dir: PathBuf,
        /// JSON5 fold definition file, the OD-25 folds by default
        #[clap(long)]
        folds_file: Option<PathBuf>,
        /// take category names from this annotation file instead of VizWiz
        #[clap(long)]
        annotation_file: Option<PathBuf>,
        /// comma separated shot counts
        #[clap(long, default_value = "1,3,5,10")]
        shots: ShotList,
    },
    /// Show the latest training metrics
    Metrics {
        /// JSON-lines metrics file
        metrics_file: PathBuf,
        /// keep polling for new records
        #[clap(long)]
        follow: bool,
        /// polling interval in seconds
        #[clap(long, default_value = "30")]
        interval: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ShotList(Vec<usize>);

impl FromStr for ShotList {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let shots: Vec<usize> = text
            .split(',')
            .map(|token| {
                let token = token.trim();
                token
                    .parse()
                    .with_context(|| format!("invalid shot count '{}'", token))
            })
            .collect::<Result<_>>()?;
        ensure!(!shots.is_empty(), "no shot counts given");
        ensure!(shots.iter().all(|&k| k > 0), "shot counts must be positive");
        Ok(Self(shots))
    }
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Opts::parse() {
        Opts::Folds {
            folds_file,
            annotation_file,
        } => folds(folds_file.as_deref(), annotation_file.as_deref())?,
        Opts::Check {
            annotation_file,
            max_category_id,
        } => check(annotation_file, max_category_id)?,
        Opts::Kshots {
            annotation_file,
            out_root,
            folds_file,
            shots,
        } => kshots(annotation_file, out_root, folds_file.as_deref(), &shots.0)?,
        Opts::Registry {
            annotation_dir,
            image_root,
            prefix,
            folds_file,
            shots,
            train_file,
            val_file,
            output_file,
        } => {
            let sources: Vec<_> = [(SourceSplit::Train, train_file), (SourceSplit::Val, val_file)]
                .into_iter()
                .filter_map(|(split, file)| Some((split, file?)))
                .collect();
            registry(
                &annotation_dir,
                &image_root,
                &prefix,
                folds_file.as_deref(),
                &shots.0,
                &sources,
                output_file.as_deref(),
            )?
        }
        Opts::Verify {
            annotation_dir,
            folds_file,
            annotation_file,
            shots,
        } => verify(
            &annotation_dir,
            folds_file.as_deref(),
            annotation_file.as_deref(),
            &shots.0,
        )?,
        Opts::Metrics {
            metrics_file,
            follow,
            interval,
        } => metrics(metrics_file, follow, Duration::from_secs(interval))?,
    }

    Ok(())
}

fn load_folds(folds_file: Option<&Path>) -> Result<Vec<FoldSpec>> {
    let folds = match folds_file {
        Some(path) => FoldSpec::load_file(path)
            .with_context(|| format!("failed to load folds file '{}'", path.display()))?,
        None => FoldSpec::od25(),
    };
    Ok(folds)
}

fn load_universe(annotation_file: Option<&Path>) -> Result<CategoryUniverse> {
    let universe = match annotation_file {
        Some(path) => CategoryUniverse::from_corpus(&Corpus::load(path)?)?,
        None => CategoryUniverse::vizwiz(),
    };
    Ok(universe)
}

fn folds(folds_file: Option<&Path>, annotation_file: Option<&Path>) -> Result<()> {
    let universe = load_universe(annotation_file)?;
    let folds = load_folds(folds_file)?;

    let mut table = Table::new();
    table.add_row(row!["fold", "base", "novel", "novel categories"]);

    for spec in &folds {
        match spec.resolve(&universe) {
            Ok(fold) => {
                let names = fold
                    .novel
                    .iter()
                    .filter_map(|&id| universe.name(id))
                    .join(", ");
                table.add_row(row![fold.name, fold.base.len(), fold.novel.len(), names]);
            }
            Err(err) => {
                table.add_row(row![spec.name, "-", "-", err]);
            }
        }
    }

    table.printstd();
    Ok(())
}

fn check(annotation_file: impl AsRef<Path>, max_category_id: u64) -> Result<()> {
    let annotation_file = annotation_file.as_ref();
    let raw = RawCorpus::load(annotation_file)?;
    let report = CorpusReport::inspect(&raw, 1..=max_category_id);

    // print summary
    {
        let mut table = Table::new();
        table.add_row(row!["images", report.num_images]);
        table.add_row(row!["annotations", report.num_annotations]);
        table.add_row(row!["categories", report.num_categories]);
        table.add_row(row![
            "category ids",
            format!(
                "{}..={}",
                report
                    .min_category_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                report
                    .max_category_id
                    .map(|id| id.to_string())
                    .unwrap_or_default()
            )
        ]);
        table.add_row(row![
            "images without annotations",
            report.images_without_annotations
        ]);
        table.add_row(row![
            "imbalance ratio",
            report
                .imbalance_ratio()
                .map(|ratio| format!("{:.1}", ratio))
                .unwrap_or_else(|| "-".to_owned())
        ]);
        table.printstd();
    }

    // print per-category counts and training indexes
    {
        let names: HashMap<_, _> = raw
            .categories
            .iter()
            .map(|cat| (cat.id, cat.name.as_str()))
            .collect();
        let ids: BTreeSet<_> = report
            .contiguous_category_ids
            .keys()
            .chain(report.annotations_per_category.keys())
            .copied()
            .collect();

        let mut table = Table::new();
        table.add_row(row!["id", "index", "name", "annotations"]);
        ids.iter().for_each(|id| {
            let index = report
                .contiguous_category_ids
                .get(id)
                .map(|index| index.to_string())
                .unwrap_or_else(|| "-".to_owned());
            table.add_row(row![
                id,
                index,
                names.get(id).copied().unwrap_or("?"),
                report.annotations_per_category.get(id).copied().unwrap_or(0)
            ]);
        });
        table.printstd();
    }

    let issues = report.issues();
    issues.iter().for_each(|issue| println!("warning: {}", issue));

    if report.has_critical_issues() {
        bail!(
            "'{}' has {} problems that prevent using it",
            annotation_file.display(),
            issues.len()
        );
    }
    if issues.is_empty() {
        println!("'{}' passes all checks", annotation_file.display());
    }

    Ok(())
}

fn kshots(
    annotation_file: impl AsRef<Path>,
    out_root: impl AsRef<Path>,
    folds_file: Option<&Path>,
    shots: &[usize],
) -> Result<()> {
    let annotation_file = annotation_file.as_ref();
    let out_root = out_root.as_ref();

    let corpus = Corpus::load(annotation_file)
        .with_context(|| format!("failed to load '{}'", annotation_file.display()))?;
    let universe = CategoryUniverse::from_corpus(&corpus)?;
    let folds = load_folds(folds_file)?;

    let mut failures = vec![];

    for spec in &folds {
        let result = (|| -> Result<()> {
            let fold = spec.resolve(&universe)?;

            for &k in shots {
                let sampled = sample_stable_prefix(&corpus, &fold.novel, k)?;
                let path = out_root
                    .join(&fold.name)
                    .join(format!("full_box_{}shot_all_trainval.json", k));
                sampled.save(&path)?;
                info!(
                    "wrote '{}': {} images, {} annotations, {} categories",
                    path.display(),
                    sampled.images().len(),
                    sampled.annotations().len(),
                    sampled.categories().len()
                );
            }

            Ok(())
        })();

        if let Err(err) = result {
            error!("{}: {:#}", spec.name, err);
            failures.push(spec.name.as_str());
        }
    }

    if !failures.is_empty() {
        return Err(format_err!(
            "{} of {} folds failed: {}",
            failures.len(),
            folds.len(),
            failures.join(", ")
        ));
    }

    Ok(())
}

fn registry(
    annotation_dir: &Path,
    image_root: &Path,
    prefix: &str,
    folds_file: Option<&Path>,
    shots: &[usize],
    sources: &[(SourceSplit, PathBuf)],
    output_file: Option<&Path>,
) -> Result<()> {
    let folds = load_folds(folds_file)?;
    let names: Vec<_> = folds.iter().map(|spec| spec.name.as_str()).collect();
    let layout = OutputLayout::new(annotation_dir);

    let entries: Vec<DatasetEntry> = source_datasets(prefix, sources, image_root)
        .into_iter()
        .chain(fold_datasets(prefix, &names, shots, &layout, image_root))
        .collect();

    let mut table = Table::new();
    table.add_row(row!["name", "annotation file", "exists"]);
    entries.iter().for_each(|entry| {
        table.add_row(row![
            entry.name,
            entry.annotation_file.display(),
            entry.annotation_file.exists()
        ]);
    });
    table.printstd();

    if let Some(path) = output_file {
        write_manifest(path, &entries)?;
        info!("saved {} entries to '{}'", entries.len(), path.display());
    }

    Ok(())
}

fn verify(
    annotation_dir: &Path,
    folds_file: Option<&Path>,
    annotation_file: Option<&Path>,
    shots: &[usize],
) -> Result<()> {
    let universe = load_universe(annotation_file)?;
    let folds = load_folds(folds_file)?;
    let layout = OutputLayout::new(annotation_dir);
    let report = verify_outputs(&layout, &folds, &universe, shots);

    let mut table = Table::new();
    table.add_row(row!["fold", "split", "variant", "images", "annotations", "categories"]);
    report.verified.iter().for_each(|output| {
        table.add_row(row![
            output.fold,
            output.split,
            output.variant,
            output.num_images,
            output.num_annotations,
            output.num_categories
        ]);
    });
    table.printstd();

    report.issues.iter().for_each(|issue| {
        let location = issue
            .path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| issue.fold.clone());
        println!("error: {}: {}", location, issue.problem);
    });

    if !report.is_clean() {
        bail!(
            "{} problems found in '{}'",
            report.issues.len(),
            annotation_dir.display()
        );
    }
    println!(
        "{} outputs of {} folds pass all checks",
        report.verified.len(),
        folds.len()
    );

    Ok(())
}

fn metrics(metrics_file: PathBuf, follow: bool, interval: Duration) -> Result<()> {
    let mut tail = MetricsTail::new(metrics_file);
    let mut records = tail.poll()?;

    if !follow {
        ensure!(
            !records.is_empty(),
            "no metrics found in '{}'",
            tail.path().display()
        );
        print_latest(&records);
        return Ok(());
    }

    loop {
        if !records.is_empty() {
            print_latest(&records);
        }
        thread::sleep(interval);
        records = tail.poll()?;
    }
}

fn print_latest(records: &[MetricRecord]) {
    let mut table = Table::new();
    table.add_row(row!["metric", "iteration", "value"]);
    latest_values(records)
        .into_iter()
        .for_each(|(name, (iteration, value))| {
            let iteration = iteration
                .map(|iter| iter.to_string())
                .unwrap_or_else(|| "-".to_owned());
            table.add_row(row![name, iteration, format!("{:.6}", value)]);
        });
    table.printstd();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shot_list_parsing() {
        assert_eq!("1,3,5,10".parse::<ShotList>().unwrap().0, [1, 3, 5, 10]);
        assert_eq!(" 2, 4 ".parse::<ShotList>().unwrap().0, [2, 4]);
        assert!("1,,3".parse::<ShotList>().is_err());
        assert!("0".parse::<ShotList>().is_err());
        assert!("five".parse::<ShotList>().is_err());
    }
}
