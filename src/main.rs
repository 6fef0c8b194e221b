//! propgen: PGD-filtered VNN-LIB robustness properties for image classifiers.
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use nnv_propgen::config::parse_epsilon;
use nnv_propgen::dataset::load_binary_batch;
use nnv_propgen::dnn::DNN;
use nnv_propgen::generate::write_manifest_for_dir;
use nnv_propgen::{generate_properties, GenerationConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

const LOG_PATTERN: &str = "{d(%H:%M:%S)} {h({l:5})} {t} - {m}{n}";

#[derive(Parser)]
#[command(name = "propgen")]
#[command(version)]
#[command(about = "Generate PGD-filtered VNN-LIB robustness properties")]
#[command(long_about = "
Screens correctly classified test images with a multi-restart targeted PGD
attack and writes a VNN-LIB robustness property for every image the attack
cannot flip, together with an instance manifest for verifier benchmarks.
")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Also write the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Screen the dataset and write properties, manifest and summary
    Generate {
        /// JSON configuration file; flags below override its values
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Network weights (JSON)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Model path recorded in the manifest
        #[arg(long)]
        manifest_model: Option<PathBuf>,

        /// Binary dataset batch
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Directory receiving properties, manifest and summary
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,

        /// Perturbation budgets, as decimals or fractions like 2/255
        #[arg(long, num_args = 1.., value_parser = epsilon_arg)]
        epsilons: Vec<f64>,

        /// Properties to generate per epsilon
        #[arg(long, short = 'n')]
        num_images: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Seed from system entropy instead of a fixed seed
        #[arg(long, conflicts_with = "seed")]
        random_seed: bool,

        /// Visit samples in dataset order
        #[arg(long)]
        deterministic: bool,

        /// Verifier timeout recorded in the manifest, in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Attack restarts per target
        #[arg(long)]
        restarts: Option<usize>,

        /// Attack steps per restart
        #[arg(long)]
        steps: Option<usize>,
    },

    /// Write a manifest for existing property files
    Manifest {
        /// Directory holding the .vnnlib files
        properties: PathBuf,

        /// Model path recorded in every row
        #[arg(long)]
        model: PathBuf,

        /// Verifier timeout in seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,

        /// Manifest file to write
        #[arg(long, default_value = "instances.csv")]
        out: PathBuf,

        /// Property paths are written relative to this directory
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn epsilon_arg(text: &str) -> std::result::Result<f64, String> {
    parse_epsilon(text).map_err(|err| err.to_string())
}

fn init_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();
    let mut builder = Config::builder().appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");
    if let Some(path) = log_file {
        let logfile = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d} {l} {t} - {m}{n}")))
            .build(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        builder = builder.appender(Appender::builder().build("logfile", Box::new(logfile)));
        root = root.appender("logfile");
    }
    let config = builder.build(root.build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Generate {
            config,
            model,
            manifest_model,
            dataset,
            output_dir,
            epsilons,
            num_images,
            seed,
            random_seed,
            deterministic,
            timeout,
            restarts,
            steps,
        } => {
            let mut config = match config {
                Some(path) => GenerationConfig::from_json_file(&path)
                    .with_context(|| format!("reading configuration {}", path.display()))?,
                None => GenerationConfig::default(),
            };
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(manifest_model) = manifest_model {
                config.manifest_model = manifest_model;
            }
            if let Some(dataset) = dataset {
                config.dataset = dataset;
            }
            if let Some(output_dir) = output_dir {
                config.output_dir = output_dir;
            }
            if !epsilons.is_empty() {
                config.epsilons = epsilons;
            }
            if let Some(num_images) = num_images {
                config.num_images = num_images;
            }
            if seed.is_some() {
                config.seed = seed;
            }
            if random_seed {
                config.seed = None;
            }
            config.deterministic |= deterministic;
            if let Some(timeout) = timeout {
                config.timeout_secs = timeout;
            }
            if let Some(restarts) = restarts {
                config.attack.num_restarts = restarts;
            }
            if let Some(steps) = steps {
                config.attack.num_steps = steps;
            }
            config.validate().context("invalid configuration")?;

            let dnn = DNN::load_json(&config.model)
                .with_context(|| format!("loading model {}", config.model.display()))?;
            let samples = load_binary_batch(&config.dataset, &config.image_format)
                .with_context(|| format!("loading dataset {}", config.dataset.display()))?;
            let mut rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };

            let reports = generate_properties(&dnn, &samples, &config, &mut rng)?;
            for report in &reports {
                println!(
                    "epsilon {:.5}: acc: {} pgd_acc: {} out of {} samples, {} properties",
                    report.epsilon,
                    report.stats.correct,
                    report.stats.robust,
                    report.stats.examined,
                    report.properties.len()
                );
            }
        }
        Commands::Manifest {
            properties,
            model,
            timeout,
            out,
            root,
        } => {
            let root = root.unwrap_or_else(|| properties.clone());
            let count = write_manifest_for_dir(&properties, &model, timeout, &out, &root)
                .with_context(|| format!("writing manifest {}", out.display()))?;
            println!("{} instances written to {}", count, out.display());
        }
    }
    Ok(())
}
