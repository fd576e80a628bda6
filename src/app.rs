use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;

use ifucube::data::filter::cube_indices;
use ifucube::data::loader::{load_file, save_file};
use ifucube::units::Unit;
use ifucube::validate::{check_file, ValidationReport, ValidatorConfig};
use ifucube::CubeList;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "ifucube", version)]
#[command(about = "Validate, repair and inspect IFU data cubes stored as FITS")]
pub struct Cli {
    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check cube headers, optionally fixing them
    Check {
        /// FITS files (.fits, .fit, .fts, optionally .gz)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Repair what can be repaired
        #[arg(long)]
        fix: bool,

        /// Overwrite the input files with the fixed headers
        #[arg(long, requires = "fix", conflicts_with = "output")]
        in_place: bool,

        /// Write the fixed file here (single input only)
        #[arg(short, long, requires = "fix")]
        output: Option<PathBuf>,

        /// JSON file replacing the default axis keyword rules
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// List HDUs and cubes of a file
    List { file: PathBuf },

    /// Export the spectrum of one spaxel as CSV
    Spectrum {
        file: PathBuf,

        #[arg(short, long)]
        x: usize,

        #[arg(short, long)]
        y: usize,

        /// Index into the file's cube list
        #[arg(long, default_value_t = 0)]
        cube: usize,

        /// CSV destination, stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run a command. `Ok(false)` means the command ran but found problems.
pub fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Command::Check {
            files,
            fix,
            in_place,
            output,
            rules,
            json,
        } => run_check(&files, fix, in_place, output.as_deref(), rules.as_deref(), json),
        Command::List { file } => run_list(&file),
        Command::Spectrum {
            file,
            x,
            y,
            cube,
            output,
        } => run_spectrum(&file, x, y, cube, output.as_deref()),
    }
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct FileReport<'a> {
    file: String,
    good: bool,
    report: &'a ValidationReport,
}

fn run_check(
    files: &[PathBuf],
    fix: bool,
    in_place: bool,
    output: Option<&Path>,
    rules: Option<&Path>,
    json: bool,
) -> Result<bool> {
    if output.is_some() && files.len() != 1 {
        bail!("--output needs exactly one input file, got {}", files.len());
    }
    let config = match rules {
        Some(path) => load_rules(path)?,
        None => ValidatorConfig::default(),
    };
    if fix && !in_place && output.is_none() {
        warn!("Fixes are not saved without --in-place or --output");
    }

    let mut all_good = true;
    let mut outcomes = Vec::with_capacity(files.len());
    for path in files {
        let outcome = check_file(path, fix, &config);
        all_good &= outcome.good;

        let destination = if in_place { Some(path.as_path()) } else { output };
        if let (Some(dest), Some(fits)) = (destination.filter(|_| fix), &outcome.fits) {
            save_file(dest, fits).with_context(|| format!("Failed to write {}", dest.display()))?;
            info!("Wrote {}", dest.display());
        }

        if !json {
            print!("{}", outcome.report);
            println!(
                "{}: {}",
                path.display(),
                if outcome.good { "OK" } else { "FAILED" }
            );
        }
        outcomes.push((path, outcome));
    }

    if json {
        let reports: Vec<FileReport> = outcomes
            .iter()
            .map(|(path, outcome)| FileReport {
                file: path.display().to_string(),
                good: outcome.good,
                report: &outcome.report,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    Ok(all_good)
}

fn load_rules(path: &Path) -> Result<ValidatorConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules from {}", path.display()))?;
    ValidatorConfig::from_json(&text)
        .with_context(|| format!("Invalid rules in {}", path.display()))
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn run_list(file: &Path) -> Result<bool> {
    let fits = load_file(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let cube_hdus = cube_indices(&fits);
    for (index, hdu) in fits.iter().enumerate() {
        let marker = if cube_hdus.contains(&index) { '*' } else { ' ' };
        let shape = hdu
            .shape()
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(|| "no data".to_string());
        println!("{marker}{index:>3}  {:<12}  {shape}", hdu.extname().unwrap_or("-"));
    }

    let cubes = CubeList::read(&fits)?;
    println!("{cubes}");
    let micron = Unit::parse("um")?;
    for cube in &cubes {
        let depth = cube.spectral_len();
        if depth == 0 {
            continue;
        }
        match (cube.wavelength_at(0, 0, 0), cube.wavelength_at(0, 0, depth - 1)) {
            (Ok(first), Ok(last)) => {
                let first = first.to(&micron).unwrap_or(first);
                let last = last.to(&micron).unwrap_or(last);
                println!("  {}: {first} .. {last}", cube.name());
            }
            (Err(err), _) | (_, Err(err)) => warn!("{}: {err}", cube.name()),
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// spectrum
// ---------------------------------------------------------------------------

fn run_spectrum(
    file: &Path,
    x: usize,
    y: usize,
    cube_index: usize,
    output: Option<&Path>,
) -> Result<bool> {
    let cubes = CubeList::open(file)?;
    let Some(cube) = cubes.get(cube_index) else {
        bail!(
            "{} holds {} cubes, no cube {cube_index}",
            file.display(),
            cubes.len()
        );
    };
    let Some(flux) = cube.spectrum(x, y) else {
        bail!(
            "Spaxel ({x}, {y}) lies outside cube {} with shape {:?}",
            cube.name(),
            cube.shape()
        );
    };

    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(["wavelength_m", "flux"])?;
    for (z, value) in flux.iter().enumerate() {
        let wavelength = cube.wavelength_at(x, y, z)?;
        writer.write_record([wavelength.value.to_string(), value.to_string()])?;
    }
    writer.flush()?;

    if let Some(path) = output {
        info!("Wrote {} samples to {}", flux.len(), path.display());
    }
    Ok(true)
}
