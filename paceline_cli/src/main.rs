use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use ndarray::{Array1, Array2};
use paceline::{compute_plan, PacingStrategy, PlanParams, PullPlanItem, WattageTable};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Paceline pull-plan computation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute a pull plan CSV for a roster at a target speed
    Plan(PlanArgs),
    /// Tabulate interpolated per-position wattage demands for given speeds
    Wattages(WattagesArgs),
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Pacing strategy
    #[arg(long, value_enum, default_value_t = StrategyOpt::IdenticalPull)]
    strategy: StrategyOpt,

    /// Number of riders in rotation order
    #[arg(long, default_value_t = 4)]
    riders: usize,

    /// Target group speed (km/h)
    #[arg(long, default_value_t = 42.0)]
    speed: f64,

    /// Rotation period (seconds)
    #[arg(long, default_value_t = 240.0)]
    period: f64,

    /// Per-rider leader-wattage ceilings (comma separated watts)
    #[arg(long)]
    ceilings: Option<String>,

    /// Hard cap on a single pull (seconds)
    #[arg(long, default_value_t = 120.0)]
    max_pull: f64,

    /// Replacement wattage table JSON path
    #[arg(long, value_hint = ValueHint::FilePath)]
    table: Option<PathBuf>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "plan.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct WattagesArgs {
    /// Speeds to evaluate (comma separated km/h)
    #[arg(required = true)]
    speeds: String,

    /// Replacement wattage table JSON path
    #[arg(long, value_hint = ValueHint::FilePath)]
    table: Option<PathBuf>,

    /// Output report path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StrategyOpt {
    ThirtySecPull,
    IdenticalPull,
    BalancedIntensity,
    EverybodyPullHard,
    Fastest,
    LastFive,
    LastFour,
}

impl From<StrategyOpt> for PacingStrategy {
    fn from(value: StrategyOpt) -> Self {
        match value {
            StrategyOpt::ThirtySecPull => PacingStrategy::ThirtySecPull,
            StrategyOpt::IdenticalPull => PacingStrategy::IdenticalPull,
            StrategyOpt::BalancedIntensity => PacingStrategy::BalancedIntensity,
            StrategyOpt::EverybodyPullHard => PacingStrategy::EverybodyPullHard,
            StrategyOpt::Fastest => PacingStrategy::Fastest,
            StrategyOpt::LastFive => PacingStrategy::LastFive,
            StrategyOpt::LastFour => PacingStrategy::LastFour,
        }
    }
}

/// On-disk shape of a replacement wattage table.
#[derive(Debug, Deserialize)]
struct TableFile {
    watts: Vec<Vec<f64>>,
    speeds_kph: Vec<f64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = match &cli.command {
        Command::Plan(args) => {
            if args.verbose {
                "debug"
            } else {
                "info"
            }
        }
        Command::Wattages(args) => {
            if args.verbose {
                "debug"
            } else {
                "info"
            }
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Plan(args) => handle_plan(args),
        Command::Wattages(args) => handle_wattages(args),
    }
}

fn handle_plan(args: PlanArgs) -> Result<()> {
    let mut params = PlanParams::default();
    params.strategy = args.strategy.into();
    params.roster_size = args.riders;
    params.target_speed_kph = args.speed;
    params.rotation_period_s = args.period;
    params.max_pull_s = args.max_pull;

    if let Some(ceilings_str) = args.ceilings.as_ref() {
        let ceilings = parse_watt_list(ceilings_str)?;
        if ceilings.len() != args.riders {
            return Err(anyhow!(
                "--ceilings lists {} riders but --riders is {}",
                ceilings.len(),
                args.riders
            ));
        }
        params.rider_ceilings_w = ceilings;
    }

    let table = load_table(args.table.as_deref())?;
    let items = compute_plan(&params, &table)?;

    let flagged = items
        .iter()
        .filter(|item| !item.diagnostic_message.is_empty())
        .count();
    info!(
        "Plan computed: {} riders, strategy {}, {:.1} km/h",
        items.len(),
        params.strategy,
        params.target_speed_kph
    );
    if flagged > 0 {
        warn!("{} of {} riders carry diagnostics", flagged, items.len());
    }

    if args.output.as_os_str() == "-" {
        write_plan_stdout(&items)?;
    } else {
        write_plan_csv(&items, &args.output)?;
        info!("Wrote plan CSV: {}", args.output.display());
    }

    Ok(())
}

fn handle_wattages(args: WattagesArgs) -> Result<()> {
    let table = load_table(args.table.as_deref())?;
    let speeds = parse_watt_list(&args.speeds).context("invalid --speeds list")?;
    if speeds.is_empty() {
        return Err(anyhow!("no speeds supplied"));
    }

    let mut report = String::new();
    report.push_str("speed_kph  p1_w     p2_w     p3_w     p4_w\n");
    for &speed in &speeds {
        let mut row = format!("{:<9.1}", speed);
        let mut extrapolated = false;
        for position in 1..=paceline::PACK_POSITIONS {
            let demand = table.wattage_for(position, speed)?;
            extrapolated |= demand.extrapolated;
            row.push_str(&format!("  {:<7.1}", demand.watts));
        }
        if extrapolated {
            row.push_str("  (extrapolated)");
        }
        report.push_str(&row);
        report.push('\n');
    }

    if args.output.as_os_str() == "-" {
        io::stdout().write_all(report.as_bytes())?;
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Wrote wattage report: {}", args.output.display());
    }

    Ok(())
}

fn load_table(path: Option<&Path>) -> Result<WattageTable> {
    let Some(path) = path else {
        return Ok(WattageTable::zwift_insider());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read table {}", path.display()))?;
    let file: TableFile = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid table JSON", path.display()))?;

    let rows = file.watts.len();
    let cols = file.watts.first().map_or(0, Vec::len);
    if file.watts.iter().any(|row| row.len() != cols) {
        return Err(anyhow!("table rows in {} have uneven lengths", path.display()));
    }
    let flat: Vec<f64> = file.watts.into_iter().flatten().collect();
    let watts = Array2::from_shape_vec((rows, cols), flat)
        .with_context(|| format!("table grid in {} is malformed", path.display()))?;
    let table = WattageTable::new(watts, Array1::from_vec(file.speeds_kph))
        .with_context(|| format!("table in {} failed validation", path.display()))?;
    Ok(table)
}

fn parse_watt_list(input: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: f64 = trimmed
            .parse()
            .with_context(|| format!("invalid value '{}': expected a number", trimmed))?;
        if value <= 0.0 {
            return Err(anyhow!("values must be > 0, got {}", value));
        }
        out.push(value);
    }
    Ok(out)
}

fn write_plan_stdout(items: &[PullPlanItem]) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_plan_rows(items, &mut writer)
}

fn write_plan_csv(items: &[PullPlanItem], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_plan_rows(items, &mut writer)
}

fn write_plan_rows<W: Write>(items: &[PullPlanItem], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "rider",
        "speed_kph",
        "p1_duration_s",
        "p1_w",
        "p2_w",
        "p3_w",
        "p4_w",
        "average_watts",
        "normalized_watts",
        "diagnostic_message",
    ])?;

    for (rider, item) in items.iter().enumerate() {
        writer.write_record([
            (rider + 1).to_string(),
            format!("{:.1}", item.speed_kph),
            format!("{:.1}", item.p1_duration),
            format!("{:.1}", item.p1_w),
            format!("{:.1}", item.p2_w),
            format!("{:.1}", item.p3_w),
            format!("{:.1}", item.p4_w),
            format!("{:.1}", item.average_watts),
            format!("{:.1}", item.normalized_watts),
            item.diagnostic_message.clone(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
