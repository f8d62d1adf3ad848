use kinest::estimate::config::EstimationConfig;
use kinest::estimate::loss::LossKind;
use kinest::estimate::metrics::FitMetrics;
use kinest::estimate::problem::{NetworkModel, NetworkProblem};
use kinest::estimate::types::ParameterVector;

use clap::{Parser, Subcommand};
use ndarray::{Array1, Array2};
use std::error::Error;
use std::fs::File;
use std::io::{self, Write};
use std::process;

#[derive(Parser)]
#[command(
    name = "kinest",
    about = "Evaluate and inspect kinase-network parameter estimation problems",
    long_about = "Tools around the kinase-network forward model: evaluate a parameter vector \
                 against observed phosphorylation series, print the parameter layout, and \
                 inspect the regularization grid of an estimation configuration."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict the observed series for one parameter vector and report its loss
    #[command(about = "Evaluate a parameter vector (outputs: predictions TSV)")]
    Evaluate {
        /// Problem description (.toml)
        #[arg(long)]
        problem: String,

        /// Parameter file: one value per line, in layout order. Defaults to the problem's `params`.
        #[arg(long)]
        params: Option<String>,

        /// Loss kind: base, weighted, softl1, cauchy or arctan. Defaults to the problem's loss.
        #[arg(long)]
        loss: Option<LossKind>,

        /// Where to write predictions; stdout when omitted
        #[arg(long)]
        output: Option<String>,
    },

    /// Print the parameter layout of a problem
    Layout {
        /// Problem description (.toml)
        #[arg(long)]
        problem: String,
    },

    /// Print the regularization strengths an estimation configuration searches
    Lambdas {
        /// Estimation configuration (.toml); built-in defaults when omitted
        #[arg(long)]
        config: Option<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Evaluate {
            problem,
            params,
            loss,
            output,
        } => evaluate_command(&problem, params.as_deref(), loss, output.as_deref()),
        Commands::Layout { problem } => layout_command(&problem),
        Commands::Lambdas { config } => lambdas_command(config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_model(path: &str) -> Result<NetworkModel, Box<dyn Error>> {
    let problem = NetworkProblem::from_toml_path(path)?;
    let model = problem.build()?;
    log::info!(
        "Loaded {} sites, {} kinases, {} parameters over {} time points from {}",
        model.layout().n_sites(),
        model.layout().n_kinases(),
        model.layout().n_params(),
        model.forward.n_time(),
        path
    );
    Ok(model)
}

/// Reads one value per line; blank lines and `#` comments are skipped.
fn read_params(path: &str) -> Result<ParameterVector, Box<dyn Error>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = record.get(0).unwrap_or("");
        let value: f64 = field
            .parse()
            .map_err(|e| format!("{}: line {}: invalid value '{}': {}", path, line + 1, field, e))?;
        values.push(value);
    }
    Ok(ParameterVector::new(Array1::from(values)))
}

fn write_predictions<W: Write>(
    model: &NetworkModel,
    prediction: &Array2<f64>,
    writer: W,
) -> Result<(), Box<dyn Error>> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);

    let mut header = vec!["site".to_string()];
    header.extend(model.time_points.iter().map(|t| t.to_string()));
    wtr.write_record(&header)?;

    for (key, row) in model.layout().site_keys().iter().zip(prediction.rows()) {
        let mut record = vec![key.to_string()];
        record.extend(row.iter().map(|v| v.to_string()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn evaluate_command(
    problem_path: &str,
    params_path: Option<&str>,
    loss: Option<LossKind>,
    output: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let model = load_model(problem_path)?;

    let params = match (params_path, &model.params) {
        (Some(path), _) => read_params(path)?,
        (None, Some(p)) => p.clone(),
        (None, None) => {
            return Err("no parameter vector: pass --params or set `params` in the problem".into());
        }
    };
    model.layout().check_len(params.as_view())?;

    let objective = model.objective(loss.unwrap_or(model.loss))?;
    let value = objective.value(params.as_view())?;
    log::info!("Loss ({}): {:.6}", objective.kind(), value);

    let extracted = model.layout().extract(params.as_view())?;
    extracted.log_values();

    let prediction = model.forward.predict(params.as_view())?;
    let metrics = FitMetrics::from_matrices(model.observed.view(), prediction.view())?;
    metrics.log_summary("network");

    match output {
        Some(path) => {
            write_predictions(&model, &prediction, File::create(path)?)?;
            log::info!("Predictions written to: {}", path);
        }
        None => write_predictions(&model, &prediction, io::stdout().lock())?,
    }
    Ok(())
}

fn layout_command(problem_path: &str) -> Result<(), Box<dyn Error>> {
    let problem = NetworkProblem::from_toml_path(problem_path)?;
    let layout = problem.layout()?;
    let mut out = io::stdout().lock();
    writeln!(
        out,
        "{} sites, {} kinases: {} alpha + {} beta = {} parameters",
        layout.n_sites(),
        layout.n_kinases(),
        layout.total_alpha(),
        layout.total_beta(),
        layout.n_params()
    )?;
    for (index, name) in layout.parameter_names().iter().enumerate() {
        writeln!(out, "{}\t{}", index, name)?;
    }
    Ok(())
}

fn lambdas_command(config_path: Option<&str>) -> Result<(), Box<dyn Error>> {
    let config = match config_path {
        Some(path) => EstimationConfig::from_toml_path(path)?,
        None => EstimationConfig::default(),
    };
    let mut out = io::stdout().lock();
    for lambda in config.lambda_grid.lambdas() {
        writeln!(out, "{}", lambda)?;
    }
    log::info!(
        "{} workers, {} bootstrap iterations, regularization {}",
        config.worker_count(),
        config.bootstraps,
        if config.use_regularization { "on" } else { "off" }
    );
    Ok(())
}
