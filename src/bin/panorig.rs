use clap::{Parser, Subcommand};
use panorig::{
    config::RunConfig,
    emit::{CameraParamsEntry, OutputLayout, write_json},
    frame::{ImageSequence, StreamSource},
    pipeline::Pipeline,
    reconstruct::{
        CameraModel, Matcher, PlanConfig, ReconstructionPlan, camera_updates,
        shared_camera_params,
    },
};
use std::{error::Error, fs, path::PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render pinhole views and rig documents from a directory of
    /// equirectangular frames.
    Convert {
        /// Directory of panoramic frames, ordered by file name.
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Run configuration (JSON). Defaults are used when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run the reconstruction engine over the output of `convert`.
    Reconstruct {
        /// Output root of a previous `convert`.
        #[arg(short, long)]
        output: PathBuf,

        /// Engine workspace. Defaults to `<output>/colmap`.
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        #[arg(long, default_value = "colmap")]
        colmap: PathBuf,

        #[arg(long, default_value_t = CameraModel::Pinhole)]
        camera_model: CameraModel,

        /// Pair selection: sequential, exhaustive, vocabtree or spatial.
        #[arg(long, default_value_t = Matcher::Sequential)]
        matcher: Matcher,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Open the sparse model in the engine's viewer when done.
        #[arg(long)]
        visualize: bool,

        /// Only print the planned engine invocations.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the default run configuration.
    Params,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(Args::parse()) {
        error!("{err}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    match args.command {
        Command::Convert {
            input,
            output,
            config,
        } => {
            let config = match config {
                Some(path) => RunConfig::load(&path)?,
                None => RunConfig::default(),
            };
            let settings = config.validate()?;

            let source = StreamSource::new(ImageSequence::new(input));
            let summary = Pipeline::new(settings, output).run(&source)?;
            info!(
                "{} images from {} frames",
                summary.records.len(),
                summary.frames_sampled
            );
        }

        Command::Reconstruct {
            output,
            workspace,
            colmap,
            camera_model,
            matcher,
            seed,
            visualize,
            dry_run,
        } => {
            let layout = OutputLayout::new(&output, Default::default());
            let entries: Vec<CameraParamsEntry> =
                serde_json::from_str(&fs::read_to_string(layout.camera_params_path())?)?;

            write_json(&layout.camera_updates_path(), &camera_updates(&entries))?;

            let plan = ReconstructionPlan::new(&PlanConfig {
                program: colmap,
                camera_model,
                matcher,
                random_seed: seed,
                visualize,
                camera_params: shared_camera_params(&entries),
                ..PlanConfig::for_layout(&layout, workspace.unwrap_or(output.join("colmap")))
            });

            match dry_run {
                true => {
                    for step in plan.steps() {
                        println!("{} {step}", plan.program().display());
                    }
                }
                false => plan.run()?,
            }
        }

        Command::Params => {
            println!("{}", RunConfig::default().to_json()?);
        }
    }

    Ok(())
}
