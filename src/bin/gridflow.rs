use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use gridflow::io::{read_config, read_network, write_result};
use gridflow::prelude::*;

/// AC power flow on JSON case files.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Power Flow
    #[clap(name = "pf")]
    PowerFlow(PfArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    /// Newton-Raphson
    Nr,
    /// Levenberg-Marquardt
    Lm,
}

impl From<Method> for SolverMethod {
    fn from(m: Method) -> Self {
        match m {
            Method::Nr => SolverMethod::NewtonRaphson,
            Method::Lm => SolverMethod::LevenbergMarquardt,
        }
    }
}

#[derive(Args)]
struct PfArgs {
    /// The input case file (JSON).
    #[arg(required = true)]
    input: PathBuf,

    /// Write the full result as JSON.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Solver configuration (JSON); flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Nonlinear solver.
    #[arg(long, value_enum)]
    method: Option<Method>,

    /// Retry a failed Newton-Raphson pass with Levenberg-Marquardt.
    #[arg(long, default_value_t = false)]
    robust: bool,

    /// Termination tolerance on per unit P & Q mismatch.
    #[arg(long)]
    tol: Option<f64>,

    /// Maximum number of iterations per solver pass.
    #[arg(long)]
    max_iter: Option<usize>,

    /// Enforce generator reactive power limits.
    #[arg(long, default_value_t = false)]
    qlim: bool,

    /// Assemble matrices and solve with multiple threads.
    #[arg(long, default_value_t = false)]
    multi_core: bool,

    /// Log every iteration.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl PfArgs {
    fn config(&self) -> Result<PowerFlowConfig> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => PowerFlowConfig::default(),
        };
        if let Some(method) = self.method {
            config.method = method.into();
        }
        if let Some(tol) = self.tol {
            config.tolerance = tol;
        }
        if let Some(max_iter) = self.max_iter {
            config.max_iter = max_iter;
        }
        config.robust |= self.robust;
        config.multi_core |= self.multi_core;
        config.verbose |= self.verbose;
        if self.qlim {
            config.control_q = QControl::Direct;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let Commands::PowerFlow(args) = &cli.command;

    let default_filter = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_target(false)
        .format_timestamp(None)
        .init();

    match execute(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

/// Runs the solve; `Ok(false)` means it finished without converging.
fn execute(args: &PfArgs) -> Result<bool> {
    let net = read_network(&args.input)?;
    let config = args.config()?;
    log::info!(
        "solving '{}' ({} buses, {} branches) with {}",
        net.name,
        net.n_bus(),
        net.branches.len(),
        config.method
    );

    let res = net.run_pf(&config)?;
    res.print_res(&net);
    println!();
    println!(
        "{}: {} iterations, losses {:.3} MW / {:.3} MVAr",
        res.status,
        res.iterations,
        res.total_loss.re * net.s_base_mva,
        res.total_loss.im * net.s_base_mva
    );
    for lv in &res.limit_violations {
        println!(
            "bus {} held at Q = {:.4} pu ({:?} limit)",
            net.buses[lv.bus].name, lv.q_bound, lv.side
        );
    }

    if let Some(out_path) = &args.output {
        write_result(out_path, &res)?;
    }
    Ok(res.converged)
}
