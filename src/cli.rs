use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint};

use crate::{habitat::AreaUnit, pipeline::StageSet};

/// Waterfowl habitat energy model
#[derive(Parser, Debug)]
#[command(name = "waterfowl", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the model (flags override the JSON config)
    Run(RunArgs),

    /// Show the checkpoint manifest of a workspace
    Status(StatusArgs),

    /// Zip an output directory into <dest>/_<dd_mm_yyyy>/<name>.zip
    Package(PackageArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON run configuration
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Workspace directory for checkpoints
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    pub workspace: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    pub output: Option<PathBuf>,

    /// Area-of-interest layer
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub aoi: Option<PathBuf>,

    /// Split the AOI layer by this field into independent runs
    #[arg(long)]
    pub aoi_key: Option<String>,

    /// Reporting-unit layer (e.g. HUC12 watersheds)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub units: Option<PathBuf>,

    /// Unique key field of the reporting units
    #[arg(long)]
    pub unit_key: Option<String>,

    /// Name field of the reporting units, used for labels
    #[arg(long)]
    pub unit_name: Option<String>,

    /// Wetland habitat layer
    #[arg(short = 'l', long, value_hint = ValueHint::FilePath)]
    pub wetland: Option<PathBuf>,

    /// Crosswalk of the wetland layer (.json or .csv)
    #[arg(short = 'x', long, value_hint = ValueHint::FilePath)]
    pub crosswalk: Option<PathBuf>,

    /// Raw habitat code field of the wetland layer
    #[arg(long)]
    pub habitat_field: Option<String>,

    /// Extra habitat layer (repeatable, in priority order)
    #[arg(long = "extra", value_hint = ValueHint::FilePath)]
    pub extras: Vec<PathBuf>,

    /// Crosswalk for each extra layer (repeatable, same order)
    #[arg(long = "extra-crosswalk", value_hint = ValueHint::FilePath)]
    pub extra_crosswalks: Vec<PathBuf>,

    /// Raw code field for each extra layer (repeatable, same order)
    #[arg(long = "extra-field")]
    pub extra_fields: Vec<String>,

    /// Energy table (habitatType,kcal)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub kcal: Option<PathBuf>,

    /// Area unit of the energy table (ha or acre)
    #[arg(long)]
    pub kcal_units: Option<AreaUnit>,

    /// Energy demand layer
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub demand: Option<PathBuf>,

    /// Admin key field of the demand layer
    #[arg(long)]
    pub admin_key: Option<String>,

    /// Species field of the demand layer
    #[arg(long)]
    pub species_field: Option<String>,

    /// Keep only demand for this species
    #[arg(long)]
    pub species: Option<String>,

    /// Demand metric field (repeatable)
    #[arg(short, long = "metric")]
    pub metrics: Vec<String>,

    /// Protected-land layer (repeatable, highest priority first)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub protected: Vec<PathBuf>,

    /// Urban mask layer
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub urban: Option<PathBuf>,

    /// PROJ.4 definition of the equal-area working CRS
    #[arg(long)]
    pub target_crs: Option<String>,

    /// PROJ.4 definition for inputs without a CRS
    #[arg(long)]
    pub source_crs: Option<String>,

    /// Stages to run: `all`, a 0/1 vector, or a comma-separated list
    #[arg(short, long)]
    pub stages: Option<StageSet>,

    /// Keep negative available hectares instead of clamping at 0
    #[arg(long)]
    pub no_clamp: bool,

    /// Output rename table (original_field_name,field_name[,species])
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub field_map: Option<PathBuf>,

    /// Worker threads for multi-AOI runs
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Workspace directory
    #[arg(value_hint = ValueHint::DirPath)]
    pub workspace: PathBuf,
}

#[derive(Args, Debug)]
pub struct PackageArgs {
    /// Output directory to archive
    #[arg(value_hint = ValueHint::DirPath)]
    pub source: PathBuf,

    /// Directory receiving the dated package folder
    #[arg(value_hint = ValueHint::DirPath)]
    pub dest: PathBuf,

    /// Archive name (defaults to the source directory name)
    #[arg(short, long)]
    pub name: Option<String>,
}
