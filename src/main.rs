use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use fishpond_patcher::atomic;
use fishpond_patcher::compute::{self, Computer, ConfigRecord};
use fishpond_patcher::il::{asm, InstructionStream};
use fishpond_patcher::script::schema::format_fingerprint;
use fishpond_patcher::script::{
    apply_script, check_script, load_dir, load_from_path, PatchError, PatchOutcome, PatchScript,
    PatchSet, StepStatus, TracingReporter,
};
use fishpond_patcher::settings::Settings;
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "fishpond-patcher")]
#[command(about = "Patch fish pond drawing code for configurable pond sizes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a patch script to a method body
    Apply {
        #[command(flatten)]
        patch: PatchArgs,

        /// Write the patched body here (otherwise printed to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Run a script without writing anything and report each step
    Check {
        #[command(flatten)]
        patch: PatchArgs,
    },

    /// List built-in and on-disk patch scripts
    List {
        /// Directory of additional scripts
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Print every value computer for a footprint
    Compute {
        #[command(flatten)]
        size: SizeArgs,

        /// Tile position used for the tile computations
        #[arg(long, default_value_t = 0)]
        tile_x: i32,

        #[arg(long, default_value_t = 0)]
        tile_y: i32,
    },
}

#[derive(Args)]
struct PatchArgs {
    /// Method body in assembly text
    #[arg(short, long)]
    input: PathBuf,

    /// Patch script file (otherwise selected by --target)
    #[arg(short, long, conflicts_with = "target")]
    script: Option<PathBuf>,

    /// Method to select a script for, e.g. FishPond::draw
    #[arg(short, long)]
    target: Option<String>,

    /// Directory of scripts searched before the built-in ones
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Game version matched against each script's version_range
    #[arg(long)]
    game_version: Option<String>,

    #[command(flatten)]
    size: SizeArgs,
}

#[derive(Args)]
struct SizeArgs {
    /// Pond width in tiles
    #[arg(long, requires = "height", conflicts_with = "settings")]
    width: Option<i32>,

    /// Pond height in tiles
    #[arg(long, requires = "width")]
    height: Option<i32>,

    /// Settings file holding PondSize (defaults apply when absent)
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl SizeArgs {
    fn config(&self) -> Result<ConfigRecord> {
        match (self.width, self.height, &self.settings) {
            (Some(width), Some(height), _) => Ok(ConfigRecord::new(width, height).validate()?),
            (_, _, Some(path)) => Ok(Settings::load(path)?.config()),
            _ => Ok(Settings::default().config()),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    match cli.command {
        Commands::Apply {
            patch,
            output,
            diff,
        } => cmd_apply(&patch, output.as_deref(), diff),

        Commands::Check { patch } => cmd_check(&patch),

        Commands::List { dir } => cmd_list(dir.as_deref()),

        Commands::Compute {
            size,
            tile_x,
            tile_y,
        } => cmd_compute(&size, tile_x, tile_y),
    }
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    // RUST_LOG controls the level; warnings only by default
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

fn read_body(path: &Path) -> Result<InstructionStream> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read method body {}", path.display()))?;
    asm::parse(&text).with_context(|| format!("failed to parse method body {}", path.display()))
}

/// Pick the script to run: an explicit file, or the first script for
/// `--target` from `--dir` and then the built-in set.
fn resolve_script(args: &PatchArgs) -> Result<PatchScript> {
    if let Some(path) = &args.script {
        return Ok(load_from_path(path)?);
    }
    let Some(target) = &args.target else {
        bail!("either --script or --target is required");
    };

    let mut set = match &args.dir {
        Some(dir) => PatchSet::from_dir(dir)?,
        None => PatchSet::default(),
    };
    set.extend(PatchSet::builtin()?);

    match set.select(target, args.game_version.as_deref())? {
        Some(script) => Ok(script.clone()),
        None => match &args.game_version {
            Some(version) => bail!("no patch script for {target} supports game version {version}"),
            None => bail!("no patch script for {target}"),
        },
    }
}

/// Helper: Show unified diff between original and patched bodies
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn report_failure(script: &str, error: &PatchError) {
    eprintln!("{} {}: Failed - {}", "✗".red(), script, error);
    if let Some(step) = error.step() {
        eprintln!("  Step: {}", step);
    }

    match error {
        PatchError::PatternNotFound { pattern, from, .. } => {
            eprintln!("  {}", "CONFLICT: Pattern matched no instructions".red());
            eprintln!("  Searched from: {}", from);
            eprintln!("  Pattern: {}", pattern);
            eprintln!("  Possible causes:");
            eprintln!("    - Method body changed in this game version");
            eprintln!("    - Script written for a different method");
            eprintln!("    - Another mod already patched this method");
        }
        PatchError::ShapeMismatch { .. } => {
            eprintln!("  Action: The input differs from the body the script was written for");
        }
        _ => {}
    }
}

fn cmd_apply(args: &PatchArgs, output: Option<&Path>, show_diff: bool) -> Result<()> {
    // 1. Load inputs
    let body = read_body(&args.input)?;
    let script = resolve_script(args)?;
    let config = args.size.config()?;

    eprintln!("Script: {} ({})", script.meta.name, script.meta.target);
    eprintln!("Size: {}", config);

    // 2. Apply
    let outcome = apply_script(&script, &body, &config, &mut TracingReporter);

    // 3. Report
    match outcome {
        PatchOutcome::Applied { stream, edits } => {
            eprintln!(
                "{} {}: Applied {} edits",
                "✓".green(),
                script.meta.name,
                edits
            );

            let patched = stream.to_string();
            if show_diff {
                display_diff(&args.input, &body.to_string(), &patched);
            }
            match output {
                Some(path) => {
                    atomic::write(path, patched.as_bytes())
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!("Wrote {}", path.display());
                }
                None if !show_diff => print!("{}", patched),
                None => {}
            }
            Ok(())
        }
        PatchOutcome::Fallback { error, .. } => {
            report_failure(&script.meta.name, &error);
            std::process::exit(1);
        }
    }
}

fn cmd_check(args: &PatchArgs) -> Result<()> {
    let body = read_body(&args.input)?;
    let script = resolve_script(args)?;
    let config = args.size.config()?;

    println!("{}", "Patch Check Report".bold());
    println!("Script: {} ({})", script.meta.name, script.meta.target);
    println!("Input: {} ({})", args.input.display(), format_fingerprint(body.fingerprint()));
    println!("Size: {}", config);
    println!();

    let check = check_script(&script, &body, &config);
    for (id, status) in &check.steps {
        match status {
            StepStatus::Ok(_) => println!("{} {}: {}", "✓".green(), id, status),
            StepStatus::Failed(_) => println!("{} {}: {}", "✗".red(), id, status),
            StepStatus::NotRun => println!("{} {}: {}", "⊘".cyan(), id, status.to_string().dimmed()),
        }
    }

    println!();
    match &check.result {
        Ok(fingerprint) => {
            println!(
                "{} {}",
                "OK".green().bold(),
                format!("output {}", format_fingerprint(*fingerprint)).dimmed()
            );
            Ok(())
        }
        Err(error) => {
            report_failure(&script.meta.name, error);
            std::process::exit(1);
        }
    }
}

fn print_script(script: &PatchScript) {
    println!(
        "  {} {} ({} steps)",
        script.meta.name.bold(),
        script.meta.target,
        script.steps.len()
    );
    if let Some(range) = &script.meta.version_range {
        println!("    version: {}", range);
    }
    if let Some(description) = &script.meta.description {
        println!("    {}", description.dimmed());
    }
}

fn cmd_list(dir: Option<&Path>) -> Result<()> {
    println!("{}", "Built-in scripts:".bold());
    for script in PatchSet::builtin()?.scripts() {
        print_script(script);
    }

    if let Some(dir) = dir {
        println!();
        println!("{}", format!("Scripts in {}:", dir.display()).bold());
        let scripts = load_dir(dir)?;
        if scripts.is_empty() {
            println!("{}", "  No .toml scripts found".yellow());
        }
        for (path, script) in &scripts {
            print_script(script);
            println!("    {}", path.display().to_string().dimmed());
        }
    }
    Ok(())
}

/// Representative argument for computers that take one.
fn sample_argument(computer: Computer) -> Option<i32> {
    match computer {
        Computer::NettingSourceRect => Some(1),
        Computer::ScaledOffset => Some(65),
        Computer::ScaledOffsetY => Some(59),
        _ => None,
    }
}

fn cmd_compute(size: &SizeArgs, tile_x: i32, tile_y: i32) -> Result<()> {
    let config = size.config()?;
    println!("{}", format!("Values for {}", config).bold());

    for computer in Computer::all() {
        let arg = sample_argument(computer);
        let value = computer.evaluate(&config, arg)?;
        let label = match arg {
            Some(arg) => format!("{}({})", computer.name(), arg),
            None => computer.name().to_string(),
        };
        println!("  {:<36} {}", label, value.to_string().green());
    }

    let (item_x, item_y) = compute::item_bucket_tile(&config, tile_x, tile_y)?;
    let (center_x, center_y) = compute::center_tile(&config, tile_x, tile_y)?;
    println!(
        "  {:<36} {}",
        format!("item-bucket-tile({tile_x}, {tile_y})"),
        format!("({item_x}, {item_y})").green()
    );
    println!(
        "  {:<36} {}",
        format!("center-tile({tile_x}, {tile_y})"),
        format!("({center_x}, {center_y})").green()
    );
    Ok(())
}
