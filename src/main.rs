use std::io::Write;
use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use env_logger::{Builder, Env};
use log::{error, warn, LevelFilter};

use ferrostatic::config::load_input_file;
use ferrostatic::error::Result;
use ferrostatic::mesher::GmshMesher;
use ferrostatic::pipeline::run_analysis;
use ferrostatic::visualization::{ExternalViewer, VisualizationPort, VisualizationRequest};

/// Linear elastic stress analysis of STL parts
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Analysis input json (material, boundary, loads)
    input: PathBuf,

    /// Surface geometry (.stl)
    geometry: PathBuf,

    /// Folder the timestamped result folder is created in. Defaults to the
    /// geometry's folder.
    #[arg(long, value_name = "DIR")]
    output_root: Option<PathBuf>,

    /// error, warn, info, debug or trace. Overrides RUST_LOG.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Viewer program to open the field file with
    #[arg(long, value_name = "PROGRAM")]
    view: Option<String>,

    /// Array to color the viewer by
    #[arg(long, value_name = "ARRAY", requires = "view")]
    color_by: Option<String>,
}

fn init_logging(level: Option<&str>) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(level) = level.and_then(|l| l.parse::<LevelFilter>().ok()) {
        builder.filter_level(level);
    }
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}

fn run(args: &Args) -> Result<PathBuf> {
    let input = load_input_file(&args.input)?;
    let mesher = GmshMesher::new(&input.mesh.gmsh, input.mesh.element_size);

    let outcome = run_analysis(&input, &args.geometry, &mesher, args.output_root.as_deref())?;
    for warning in &outcome.warnings {
        warn!("{warning}");
    }

    if let Some(program) = &args.view {
        let request = VisualizationRequest::new(&outcome.field_file, args.color_by.as_deref())?;
        ExternalViewer::new(program).show(&request)?;
    }

    Ok(outcome.field_file)
}

fn main() {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    match run(&args) {
        Ok(field_file) => println!("{}", field_file.display()),
        Err(err) => {
            error!("{err}");
            eprintln!("error: {err}");
            std::process::exit(1)
        }
    }
}
