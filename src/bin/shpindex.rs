//! Build and inspect the companion index files of a shapefile.

use clap::{Parser, Subcommand, ValueEnum};
use shapeview::prelude::*;
use shapeview::{IndexFile, ShapefileReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "shpindex", version, about = "Shapefile index maintenance")]
struct Args {
    /// JSON or TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Spatial index variant; overrides the configuration file
    #[arg(long, global = true, value_enum)]
    kind: Option<KindArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write .shx, the spatial index and .fix
    Index { shp: PathBuf },
    /// Print ordinals whose bounds intersect a box
    Query {
        shp: PathBuf,
        /// min_x,min_y,max_x,max_y
        #[arg(long, value_parser = parse_bbox)]
        bbox: Envelope,
    },
    /// Print index statistics as JSON
    Stats { shp: PathBuf },
    /// Compare .shx against a full scan of the geometry file
    Verify { shp: PathBuf },
    /// Paint onto an in-memory raster and print the summary
    Render {
        shp: PathBuf,
        #[arg(long, default_value_t = 1024)]
        width: u32,
        #[arg(long, default_value_t = 768)]
        height: u32,
        /// Defaults to the layer bounds
        #[arg(long, value_parser = parse_bbox)]
        bbox: Option<Envelope>,
    },
    /// Tombstone a feature id such as roads.12
    Remove { shp: PathBuf, fid: String },
    /// Drop tombstones from the .fix file
    Compact { shp: PathBuf },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Quad,
    Rtree,
    Memory,
}

impl From<KindArg> for IndexKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Quad => IndexKind::Quad,
            KindArg::Rtree => IndexKind::RTree,
            KindArg::Memory => IndexKind::Memory,
        }
    }
}

fn parse_bbox(s: &str) -> std::result::Result<Envelope, String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("{v:?}: {e}")))
        .collect::<std::result::Result<_, _>>()?;
    match values.as_slice() {
        &[x1, y1, x2, y2] => Ok(Envelope::new(x1, y1, x2, y2)),
        _ => Err(format!("expected 4 comma-separated numbers, got {}", values.len())),
    }
}

fn load_config(path: Option<&Path>, kind: Option<KindArg>) -> std::result::Result<Config, String> {
    let mut config = match path {
        None => Config::default(),
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            let parsed = if path.extension().is_some_and(|ext| ext == "toml") {
                Config::from_toml(&text).map_err(|e| e.to_string())
            } else {
                Config::from_json(&text).map_err(|e| e.to_string())
            };
            parsed.map_err(|e| format!("{}: {e}", path.display()))?
        }
    };
    if let Some(kind) = kind {
        config.index.kind = kind.into();
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ShapeError::InvalidInput(e.to_string()))?;
    println!("{text}");
    Ok(())
}

fn run(command: Command, config: Config) -> Result<()> {
    let open = |shp: &Path| DatasetBuilder::new(shp).config(config.clone()).build();

    match command {
        Command::Index { shp } => {
            let report = open(&shp)?.index_all()?;
            log::info!(
                "indexed {} records into {} nodes",
                report.records,
                report.spatial.node_count
            );
            print_json(&report)
        }
        Command::Query { shp, bbox } => {
            bbox.validate()?;
            let dataset = open(&shp)?;
            let mut session = dataset.open_session()?;
            let ordinals = match session.candidates(&bbox) {
                Some(ordinals) => ordinals,
                None => {
                    log::info!("no usable spatial index, scanning");
                    let mut hits = Vec::new();
                    for item in session.reader().envelopes() {
                        let (ordinal, envelope) = item?;
                        if envelope.intersects(&bbox) {
                            hits.push(ordinal as u32);
                        }
                    }
                    hits
                }
            };
            for ordinal in ordinals {
                println!("{ordinal}");
            }
            Ok(())
        }
        Command::Stats { shp } => {
            let dataset = open(&shp)?;
            let session = dataset.open_session()?;
            let stats = serde_json::json!({
                "typename": dataset.typename(),
                "records": session.record_index().map(IndexFile::record_count),
                "spatial_index": session.spatial_index().map(|index| index.stats()),
                "fid_index": session.fids().is_some(),
            });
            print_json(&stats)
        }
        Command::Verify { shp } => {
            let dataset = open(&shp)?;
            let shx = IndexFile::open(&dataset.paths().shx)?;
            let mut reader = ShapefileReader::open(&shp)?;
            shx.verify_against(&mut reader)?;
            println!("{} records consistent", shx.record_count());
            Ok(())
        }
        Command::Render {
            shp,
            width,
            height,
            bbox,
        } => {
            let dataset = Arc::new(open(&shp)?);
            let envelope = match bbox {
                Some(bbox) => bbox,
                None => ShapefileReader::open(&shp)?.bounds(),
            };
            let device = DeviceRect::sized(width, height);
            let mut sink = RasterSink::new(device);
            let summary = ShapefileRenderer::new(dataset).paint(&mut sink, device, envelope)?;
            log::info!("{} pixels painted", sink.painted_pixels());
            print_json(&summary)
        }
        Command::Remove { shp, fid } => {
            if open(&shp)?.remove_feature(&fid)? {
                println!("removed {fid}");
            } else {
                println!("{fid} not found");
            }
            Ok(())
        }
        Command::Compact { shp } => {
            let live = open(&shp)?.compact_fid_index()?;
            println!("{live} live features");
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match load_config(args.config.as_deref(), args.kind) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::from(2);
        }
    };
    match run(args.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
