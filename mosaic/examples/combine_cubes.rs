//! Example: Combine ERIS exposures into one mosaic
//!
//! Reads every input FITS file, derives pixel shifts from the telescope offsets
//! (plus an optional drift table), co-adds the exposures onto their common grid
//! and writes the combined product.
//!
//! Settings come from the YAML file named by `MOSAIC_CONFIG` when set, the
//! defaults otherwise. Logs go to the console and to `logs/`.
//!
//! # Usage
//!
//! ```bash
//! MOSAIC_CONFIG=combine.yaml cargo run --release --example combine_cubes -- \
//!     [--drifts drifts.csv] combined.fits exposure1.fits exposure2.fits ...
//! ```

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use common::log_setup::setup_logging;
use mosaic::fits::{read_exposure, write_combined};
use mosaic::{CombineConfig, DriftTable, Drifts, FitsLayout, combine, compute_eris_offset};

struct Args {
    drifts: Option<PathBuf>,
    output: PathBuf,
    inputs: Vec<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = env::args().skip(1);
    let mut drifts = None;
    let mut positional = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--drifts" {
            let path = args.next().context("--drifts needs a file name")?;
            drifts = Some(PathBuf::from(path));
        } else {
            positional.push(PathBuf::from(arg));
        }
    }

    if positional.len() < 2 {
        bail!("Usage: combine_cubes [--drifts drifts.csv] <output.fits> <input.fits>...");
    }
    let output = positional.remove(0);
    Ok(Args {
        drifts,
        output,
        inputs: positional,
    })
}

fn main() -> Result<()> {
    setup_logging("info", "logs")?;
    let args = parse_args()?;

    let config = match env::var_os("MOSAIC_CONFIG") {
        Some(path) => CombineConfig::load(&path)?,
        None => CombineConfig::default(),
    };

    let layout = FitsLayout::default();
    let exposures = args
        .inputs
        .iter()
        .map(|path| read_exposure(path, &layout))
        .collect::<Result<Vec<_>, _>>()?;

    let drifts = match &args.drifts {
        Some(path) => Some(Drifts::Table(DriftTable::from_path(path)?)),
        None => None,
    };
    let shifts = compute_eris_offset(&exposures, drifts.as_ref())?;
    for (path, shift) in args.inputs.iter().zip(&shifts) {
        println!("{:>8.3} {:>8.3}  {}", shift.x, shift.y, path.display());
    }

    let product = combine(&exposures, Some(&shifts), &config)?;
    write_combined(&args.output, &product)?;

    println!(
        "Combined {} exposures into {:?} -> {}",
        exposures.len(),
        product.data.shape(),
        args.output.display()
    );
    Ok(())
}
