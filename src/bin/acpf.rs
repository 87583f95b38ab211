use acpf::debug::{format_complex, format_f64, format_polar};
use acpf::{
    cases, AcLoadFlowContext, AcLoadFlowEngine, AcLoadFlowParametersBuilder, AcLoadFlowStatus,
    LoggingObserver, NewtonRaphsonParametersBuilder, PerEquationTypeStoppingCriteria,
    StoppingCriteriaType, VoltageInitMode,
};
use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use num_complex::Complex64;

/// AC power flow with outer-loop controls.
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

    /// List the built-in cases
    Cases,
}

#[derive(Args)]
struct PfArgs {
    /// Built-in case name.
    #[arg(required = true)]
    case: String,

    /// Maximum number of Newton-Raphson iterations.
    #[arg(long)]
    pub max_it: Option<usize>,

    /// Maximum number of outer loop iterations.
    #[arg(long)]
    pub max_outer_it: Option<usize>,

    /// Per equation mismatch tolerance (p.u.).
    #[arg(long)]
    pub tol: Option<f64>,

    /// Per equation type mismatch tolerances instead of a uniform one.
    #[arg(long, default_value_t = false)]
    pub per_equation_type: bool,

    /// Initial voltage values.
    #[arg(long, value_enum, default_value_t = VoltageInitMode::Uniform)]
    pub init: VoltageInitMode,

    /// Outer loops to run, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub outer_loops: Vec<String>,

    /// Log the mismatch norm of each iteration.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    builder
        .format_level(false)
        .format_target(false)
        .format_timestamp(None);
    if let Commands::PowerFlow(args) = &cli.command {
        if args.verbose {
            builder.filter_level(log::LevelFilter::Info);
        }
    }
    builder.init();

    match execute(&cli) {
        Ok(_) => {
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    }
}

fn execute(cli: &Cli) -> Result<()> {
    let args = match &cli.command {
        Commands::PowerFlow(args) => args,
        Commands::Cases => {
            for name in cases::CASE_NAMES {
                println!("{}", name);
            }
            return Ok(());
        }
    };

    let network = cases::by_name(&args.case)?;

    let mut newton_raphson = NewtonRaphsonParametersBuilder::default();
    if let Some(max_it) = args.max_it {
        newton_raphson.max_iterations(max_it);
    }
    if args.per_equation_type {
        let mut criteria = PerEquationTypeStoppingCriteria::default();
        if let Some(tol) = args.tol {
            criteria.max_active_power_mismatch = tol;
            criteria.max_reactive_power_mismatch = tol;
            criteria.max_voltage_mismatch = tol;
        }
        newton_raphson.stopping_criteria(StoppingCriteriaType::PerEquationType(criteria));
    } else if let Some(tol) = args.tol {
        newton_raphson.stopping_criteria(StoppingCriteriaType::Uniform {
            conv_eps_per_eq: tol,
        });
    }

    let mut parameters = AcLoadFlowParametersBuilder::default();
    parameters
        .newton_raphson(newton_raphson.build()?)
        .voltage_init_mode(args.init)
        .outer_loop_names(args.outer_loops.clone());
    if let Some(max_outer_it) = args.max_outer_it {
        parameters.max_outer_iterations(max_outer_it);
    }

    let mut context = AcLoadFlowContext::new(network, parameters.build()?)?;
    let mut engine = AcLoadFlowEngine::new(&mut context);
    if args.verbose {
        engine = engine.add_observer(Box::new(LoggingObserver));
    }
    let result = engine.run()?;

    println!(
        "{}: {} ({} outer iterations, {} Newton-Raphson iterations)",
        context.network().name,
        result.status,
        result.outer_iterations,
        result.newton_raphson_iterations
    );
    if result.status != AcLoadFlowStatus::Converged {
        bail!("power flow did not converge: {}", result.status);
    }
    println!(
        "slack bus active power mismatch: {}",
        format_f64(result.slack_bus_active_power_mismatch)
    );

    let network = context.network();
    println!("\nbus voltages");
    for bus in &network.buses {
        println!("{:>4} {:<12} {}", bus.num, bus.name, format_polar(bus.v, bus.angle));
    }
    println!("\nbranch flows");
    for br in &network.branches {
        println!(
            "{:>4} {:>4} -> {:<4} {:>24} {:>24}",
            br.num,
            br.bus1,
            br.bus2,
            format_complex(&Complex64::new(br.p1, br.q1)),
            format_complex(&Complex64::new(br.p2, br.q2))
        );
    }
    Ok(())
}
