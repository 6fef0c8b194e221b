//! End-to-end generation: screen the dataset once per epsilon, write the
//! surviving properties, then the instance manifest and a run summary.
use crate::attack::ProjectedAttack;
use crate::classifier::{Classifier, NormalizedModel};
use crate::config::GenerationConfig;
use crate::dataset::{sample_order, Sample};
use crate::error::{PropGenError, Result};
use crate::filter::{FilterLoop, FilterStats};
use crate::instances::{relative_to, write_instances_file, Instance};
use crate::vnnlib::{property_file_name, VnnlibDirectory};
use crate::NNVFloat;
use itertools::Itertools;
use log::{info, warn};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "instances.csv";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Clone, Debug, Serialize)]
pub struct EpsilonReport {
    pub epsilon: NNVFloat,
    pub stats: FilterStats,
    pub properties: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    model: &'a Path,
    dataset: &'a Path,
    seed: Option<u64>,
    deterministic: bool,
    num_images: usize,
    reports: &'a [EpsilonReport],
}

/// Epsilons must stay distinguishable in property file names.
fn check_distinct_names(epsilons: &[NNVFloat]) -> Result<()> {
    match epsilons
        .iter()
        .map(|&eps| property_file_name(0, eps))
        .duplicates()
        .next()
    {
        Some(name) => Err(PropGenError::InvalidConfig(format!(
            "several epsilons map to the same property file {}",
            name
        ))),
        None => Ok(()),
    }
}

/// # Errors
/// If the configuration is invalid, a sample cannot be screened, or an
/// output file cannot be written
pub fn generate_properties<C, R>(
    model: &C,
    samples: &[Sample],
    config: &GenerationConfig,
    rng: &mut R,
) -> Result<Vec<EpsilonReport>>
where
    C: Classifier + ?Sized,
    R: rand::Rng + ?Sized,
{
    config.validate()?;
    check_distinct_names(&config.epsilons)?;
    if model.num_classes() != config.image_format.num_classes {
        warn!(
            "model has {} classes but the dataset format declares {}",
            model.num_classes(),
            config.image_format.num_classes
        );
    }
    info!(
        "model: {} epsilons: {:?} total images: {}",
        config.model.display(),
        config.epsilons,
        config.num_images
    );
    info!("deterministic {} seed: {:?}", config.deterministic, config.seed);

    let order = sample_order(samples.len(), !config.deterministic, rng);
    let normalized = NormalizedModel::new(model, &config.normalization);
    let mut reports = Vec::with_capacity(config.epsilons.len());
    for &epsilon in &config.epsilons {
        let attack = ProjectedAttack::new(epsilon, config.attack.clone())?;
        let filter = FilterLoop::new(normalized.clone(), attack, config.num_images);
        let mut sink = VnnlibDirectory::create(
            &config.output_dir,
            epsilon,
            model.num_classes(),
            &config.dataset_title,
        )?;
        let stream = order
            .iter()
            .map(|&idx| (idx, samples[idx].image.view(), samples[idx].label));
        let stats = filter.run(stream, rng, &mut sink)?;
        info!(
            "epsilon {}: acc: {} pgd_acc: {} out of {} samples",
            epsilon, stats.correct, stats.robust, stats.examined
        );
        if stats.robust < config.num_images {
            warn!(
                "only {} of {} requested properties at epsilon {}",
                stats.robust, config.num_images, epsilon
            );
        }
        reports.push(EpsilonReport {
            epsilon,
            stats,
            properties: sink.into_written(),
        });
    }

    let instances: Vec<Instance> = reports
        .iter()
        .flat_map(|report| report.properties.iter())
        .map(|path| {
            Instance::new(
                config.manifest_model.clone(),
                relative_to(path, &config.output_dir),
                config.timeout_secs,
            )
        })
        .collect();
    let manifest = config.output_dir.join(MANIFEST_FILE);
    write_instances_file(&manifest, &instances)?;
    info!("wrote {} instances to {}", instances.len(), manifest.display());

    write_summary(
        &config.output_dir.join(SUMMARY_FILE),
        &RunSummary {
            model: &config.model,
            dataset: &config.dataset,
            seed: config.seed,
            deterministic: config.deterministic,
            num_images: config.num_images,
            reports: &reports,
        },
    )?;
    Ok(reports)
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let file = File::create(path).map_err(|err| PropGenError::io(path, err))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary).map_err(|source| PropGenError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(|err| PropGenError::io(path, err))
}

/// Manifest for property files generated earlier, e.g. by several runs into
/// one directory.
///
/// # Errors
/// If the directory cannot be listed or the manifest cannot be written
pub fn write_manifest_for_dir(
    properties: &Path,
    model: &Path,
    timeout_secs: u64,
    manifest: &Path,
    root: &Path,
) -> Result<usize> {
    let instances: Vec<Instance> = crate::instances::collect_properties(properties)?
        .iter()
        .map(|path| Instance::new(model, relative_to(path, root), timeout_secs))
        .collect();
    if let Some(parent) = manifest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| PropGenError::io(parent, err))?;
    }
    write_instances_file(manifest, &instances)?;
    Ok(instances.len())
}
