use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, ContentArrangement, Row, Table, presets::UTF8_FULL};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use gridfit::{
    FitOptions, FitResult, GridSpec, InterpMethod, Smoothness, SolverKind, build_system, fit_grid,
};
use ndarray::{Array1, Array2, s};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "gridfit")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), "+", env!("GRIDFIT_BUILD_TIMESTAMP")))]
#[command(about = "Smooth gridded surfaces from scattered data", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Fit(FitArgs),
    /// Assemble the system without solving and report block sizes.
    System(SystemArgs),
}

#[derive(Args, Debug)]
struct GridArgs {
    /// CSV with a header row; the last column is the response.
    #[arg(long = "data")]
    data: PathBuf,
    /// One per axis: `start:stop:count` or a comma-separated node list.
    #[arg(long = "axis", required = true)]
    axis: Vec<String>,
    /// A single weight or one per axis, comma-separated.
    #[arg(long = "smoothness")]
    smoothness: Option<String>,
    #[arg(long = "method")]
    method: Option<String>,
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct FitArgs {
    #[command(flatten)]
    grid: GridArgs,
    #[arg(long = "solver")]
    solver: Option<String>,
    #[arg(long = "out")]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct SystemArgs {
    #[command(flatten)]
    grid: GridArgs,
}

struct Dataset {
    headers: Vec<String>,
    points: Array2<f64>,
    values: Array1<f64>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Command::Fit(args) => run_fit(args),
        Command::System(args) => run_system(args),
    }
}

fn run_fit(args: FitArgs) -> Result<(), String> {
    let mut options = resolve_options(&args.grid)?;
    if let Some(raw) = args.solver.as_deref() {
        options.solver = raw.parse::<SolverKind>().map_err(|e| e.to_string())?;
    }
    let ds = load_dataset(&args.grid.data)?;
    let grid = parse_grid(&args.grid.axis, ds.points.ncols())?;

    let fit = fit_grid(ds.points.view(), ds.values.view(), &grid, &options)
        .map_err(|e| format!("fit failed: {e}"))?;
    write_grid_csv(&args.out, &ds.headers, &fit)?;

    let d = &fit.diagnostics;
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["quantity", "value"]);
    let shape = fit
        .shape()
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" x ");
    let smoothness_rows = d
        .smoothness_rows
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let rows: Vec<(&str, String)> = vec![
        ("grid", shape),
        ("method", d.interp_method.to_string()),
        ("solver", d.solver.to_string()),
        ("fidelity rows", d.fidelity_rows.to_string()),
        ("smoothness rows", smoothness_rows),
        ("nonzeros", d.nonzeros.to_string()),
        ("fidelity rmse", format!("{:.6e}", d.fidelity_rmse)),
        ("penalty norm", format!("{:.6e}", d.penalty_norm)),
        ("normal residual", format!("{:.3e}", d.normal_residual)),
    ];
    for (name, value) in rows {
        table.add_row(Row::from(vec![Cell::new(name), Cell::new(value)]));
    }
    println!("{table}");
    println!("wrote {} grid values to {}", grid.total_nodes(), args.out.display());
    Ok(())
}

fn run_system(args: SystemArgs) -> Result<(), String> {
    let options = resolve_options(&args.grid)?;
    let ds = load_dataset(&args.grid.data)?;
    let grid = parse_grid(&args.grid.axis, ds.points.ncols())?;

    let system = build_system(
        ds.points.view(),
        &grid,
        &options.smoothness,
        options.interp_method,
    )
    .map_err(|e| format!("assembly failed: {e}"))?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["block", "rows", "nonzeros", "weight", "scale"]);
    table.add_row(Row::from(vec![
        Cell::new(format!("fidelity ({})", options.interp_method)),
        Cell::new(system.fidelity.nrows()),
        Cell::new(system.fidelity.parts().1.len()),
        Cell::new("-"),
        Cell::new("-"),
    ]));
    for penalty in &system.penalties {
        table.add_row(Row::from(vec![
            Cell::new(format!("smoothness axis {}", penalty.axis)),
            Cell::new(penalty.nrows()),
            Cell::new(penalty.matrix.parts().1.len()),
            Cell::new(format!("{:.4}", penalty.weight)),
            Cell::new(format!("{:.6e}", penalty.scale)),
        ]));
    }
    println!("{table}");
    println!(
        "{} equations for {} grid values",
        system.row_count(),
        system.ncols()
    );
    Ok(())
}

fn resolve_options(args: &GridArgs) -> Result<FitOptions, String> {
    let mut options = match &args.config {
        Some(path) => {
            let payload = fs::read_to_string(path)
                .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
            FitOptions::from_json_str(&payload)
                .map_err(|e| format!("failed to parse config json: {e}"))?
        }
        None => FitOptions::default(),
    };
    if let Some(raw) = args.smoothness.as_deref() {
        let weights = parse_list(raw).map_err(|e| format!("invalid --smoothness: {e}"))?;
        options.smoothness = match weights.as_slice() {
            [single] => Smoothness::Uniform(*single),
            _ => Smoothness::PerAxis(weights),
        };
    }
    if let Some(raw) = args.method.as_deref() {
        options.interp_method = raw.parse::<InterpMethod>().map_err(|e| e.to_string())?;
    }
    Ok(options)
}

fn parse_list(raw: &str) -> Result<Vec<f64>, String> {
    raw.split(',')
        .map(|tok| {
            let tok = tok.trim();
            tok.parse::<f64>()
                .map_err(|_| format!("'{tok}' is not a number"))
        })
        .collect()
}

fn parse_axis(raw: &str) -> Result<Array1<f64>, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [start, stop, count] => {
            let start = start
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid axis start in '{raw}'"))?;
            let stop = stop
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid axis stop in '{raw}'"))?;
            let count = count
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid axis node count in '{raw}'"))?;
            Ok(Array1::linspace(start, stop, count))
        }
        [list] => parse_list(list)
            .map(Array1::from)
            .map_err(|e| format!("invalid axis '{raw}': {e}")),
        _ => Err(format!(
            "invalid axis '{raw}': expected start:stop:count or a comma list"
        )),
    }
}

fn parse_grid(specs: &[String], ndim: usize) -> Result<GridSpec, String> {
    if specs.len() != ndim {
        return Err(format!(
            "data has {ndim} coordinate columns but {} --axis values were given",
            specs.len()
        ));
    }
    let axes = specs
        .iter()
        .map(|raw| parse_axis(raw))
        .collect::<Result<Vec<_>, _>>()?;
    GridSpec::new(axes).map_err(|e| format!("invalid grid: {e}"))
}

fn load_dataset(path: &Path) -> Result<Dataset, String> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| format!("failed to open csv '{}': {e}", path.display()))?;

    let headers = rdr
        .headers()
        .map_err(|e| format!("failed to read csv headers: {e}"))?
        .iter()
        .map(|s| s.trim().to_string())
        .collect::<Vec<_>>();
    if headers.len() < 2 {
        return Err("csv needs at least one coordinate column and a response column".to_string());
    }

    let mut records = Vec::<StringRecord>::new();
    for rec in rdr.records() {
        let record = rec.map_err(|e| format!("failed reading csv row: {e}"))?;
        if record.len() != headers.len() {
            return Err(format!(
                "csv row width mismatch: got {} fields, expected {}",
                record.len(),
                headers.len()
            ));
        }
        records.push(record);
    }
    if records.is_empty() {
        return Err("csv has no rows".to_string());
    }

    let n = records.len();
    let p = headers.len();
    let mut table = Array2::<f64>::zeros((n, p));
    for (i, rec) in records.iter().enumerate() {
        for (j, raw) in rec.iter().enumerate() {
            let raw = raw.trim();
            table[[i, j]] = raw.parse::<f64>().map_err(|_| {
                format!(
                    "non-numeric value '{raw}' at row {}, column '{}'",
                    i + 1,
                    headers[j]
                )
            })?;
        }
    }

    let points = table.slice(s![.., ..p - 1]).to_owned();
    let values = table.column(p - 1).to_owned();
    Ok(Dataset {
        headers,
        points,
        values,
    })
}

fn write_grid_csv(path: &Path, headers: &[String], fit: &FitResult) -> Result<(), String> {
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| format!("failed to create output csv '{}': {e}", path.display()))?;
    let ndim = fit.shape().len();
    let mut header = headers[..ndim].to_vec();
    header.push("value".to_string());
    wtr.write_record(&header)
        .map_err(|e| format!("failed to write csv header: {e}"))?;
    for node in fit.node_values() {
        let mut record = node
            .coords
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>();
        record.push(node.value.to_string());
        wtr.write_record(&record)
            .map_err(|e| format!("failed writing csv row: {e}"))?;
    }
    wtr.flush()
        .map_err(|e| format!("failed to flush output csv: {e}"))?;
    Ok(())
}
