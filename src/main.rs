use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use mha_sim::{
    analyze_bits,
    fixed::dequantize_matrix,
    reference_forward,
    utils::{first_mismatch, max_abs_diff, read_matrix, write_matrix},
    Dispatch, MhaConfig, SimSettings, Stimulus, StimulusDistribution, StimulusFiles, Testbench,
};

#[derive(Parser)]
#[command(name = "mha-sim")]
#[command(about = "Clock-accurate fixed-point multi-head attention accelerator simulator")]
#[command(version)]
struct Cli {
    /// Settings file (TOML); command-line flags override its values
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, value_name = "LEVEL", global = true, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate the accelerator on a stimulus set
    Run(RunCommand),
    /// Compute the floating-point reference output
    Reference(ReferenceCommand),
    /// Report the Q-format a matrix needs
    Analyze {
        file: PathBuf,
    },
    /// Compare two matrix files element-wise
    Compare {
        a: PathBuf,
        b: PathBuf,
        #[arg(long, default_value_t = 0.01)]
        tolerance: f64,
    },
    /// Write a random stimulus set
    Generate(GenerateCommand),
}

#[derive(Args)]
struct StimulusArgs {
    /// Directory holding q.txt, k.txt, v.txt, w_out.txt and b_out.txt
    #[arg(long, value_name = "DIR", default_value = "matrices")]
    stimulus: PathBuf,

    /// The weight file is stored [in][out] and must be transposed
    #[arg(long)]
    transpose_w_out: bool,

    #[arg(long)]
    num_heads: Option<usize>,
}

#[derive(Args)]
struct RunCommand {
    #[command(flatten)]
    stimulus: StimulusArgs,

    #[arg(short, long, default_value = "output_sim.txt")]
    output: PathBuf,

    #[arg(long, value_enum)]
    dispatch: Option<Dispatch>,

    /// Worker threads for concurrent dispatch
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    max_cycles: Option<u64>,

    /// Compare against the floating-point reference
    #[arg(long)]
    check: bool,

    #[arg(long, default_value_t = 0.01)]
    tolerance: f64,
}

#[derive(Args)]
struct ReferenceCommand {
    #[command(flatten)]
    stimulus: StimulusArgs,

    #[arg(short, long, default_value = "output_ref.txt")]
    output: PathBuf,

    /// Log a bit-width report for every stage
    #[arg(long)]
    analyze: bool,
}

#[derive(Args)]
struct GenerateCommand {
    #[arg(short, long, value_name = "DIR", default_value = "matrices")]
    output_dir: PathBuf,

    #[arg(long, default_value_t = 4)]
    seq_len: usize,

    #[arg(long, default_value_t = 64)]
    embed_dim: usize,

    #[arg(long, value_enum, default_value_t = StimulusDistribution::Uniform)]
    distribution: StimulusDistribution,

    /// Half-width of the uniform range, or the normal standard deviation
    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Pretty => subscriber.pretty().init(),
    }
}

fn load_stimulus(args: &StimulusArgs) -> Result<Stimulus> {
    Stimulus::load(&StimulusFiles::in_dir(&args.stimulus), args.transpose_w_out)
        .with_context(|| format!("Failed to load stimulus from {}", args.stimulus.display()))
}

/// Settings file over the stimulus shape, then command-line flags.
fn attention_config(
    settings: &SimSettings,
    stimulus: &Stimulus,
    num_heads: Option<usize>,
    dispatch: Option<Dispatch>,
    workers: Option<usize>,
) -> MhaConfig {
    let mut config = settings
        .attention
        .resolve(stimulus.seq_len(), stimulus.embed_dim());
    if let Some(num_heads) = num_heads {
        config.num_heads = num_heads;
    }
    if let Some(dispatch) = dispatch {
        config.dispatch = dispatch;
    }
    if let Some(workers) = workers {
        config.worker_threads = Some(workers);
    }
    config
}

fn run(settings: SimSettings, cmd: RunCommand) -> Result<()> {
    let stimulus = load_stimulus(&cmd.stimulus)?;
    let config = attention_config(
        &settings,
        &stimulus,
        cmd.stimulus.num_heads,
        cmd.dispatch,
        cmd.workers,
    );
    let num_heads = config.num_heads;

    let mut testbench_config = settings.testbench.clone();
    if let Some(max_cycles) = cmd.max_cycles {
        testbench_config.max_cycles = max_cycles;
    }

    let mut bench = Testbench::new(config, testbench_config).context("Failed to elaborate")?;
    let (y, report) = bench
        .simulate(&stimulus.quantize())
        .context("Simulation failed")?;
    info!(
        cycles = report.cycles,
        done_at_ns = report.done_at_ns,
        head_cycles = ?report.head_cycles,
        "simulation finished"
    );

    let y = dequantize_matrix(&y);
    write_matrix(&cmd.output, &y)
        .with_context(|| format!("Failed to write {}", cmd.output.display()))?;
    info!(path = %cmd.output.display(), "output written");

    if cmd.check {
        let reference = reference_forward(
            stimulus.q.view(),
            stimulus.k.view(),
            stimulus.v.view(),
            stimulus.w_out.view(),
            stimulus.b_out.view(),
            num_heads,
        )?;
        let expected = reference
            .output
            .context("Reference produced no projected output")?;
        check_close(&y, &expected, cmd.tolerance)?;
    }
    Ok(())
}

fn reference(settings: SimSettings, cmd: ReferenceCommand) -> Result<()> {
    let stimulus = load_stimulus(&cmd.stimulus)?;
    let num_heads = cmd
        .stimulus
        .num_heads
        .unwrap_or_else(|| settings.attention.num_heads());

    let trace = reference_forward(
        stimulus.q.view(),
        stimulus.k.view(),
        stimulus.v.view(),
        stimulus.w_out.view(),
        stimulus.b_out.view(),
        num_heads,
    )?;

    if cmd.analyze {
        let inputs = [("input Q", &stimulus.q), ("input K", &stimulus.k), ("input V", &stimulus.v)];
        for (name, matrix) in inputs {
            println!("{}", analyze_bits(name, matrix));
        }
        for (name, matrix) in trace.stages() {
            println!("{}", analyze_bits(&name, matrix));
        }
    }

    let output = trace
        .output
        .context("Reference produced no projected output")?;
    write_matrix(&cmd.output, &output)
        .with_context(|| format!("Failed to write {}", cmd.output.display()))?;
    info!(path = %cmd.output.display(), num_heads, "reference written");
    Ok(())
}

fn check_close(a: &ndarray::Array2<f64>, b: &ndarray::Array2<f64>, tolerance: f64) -> Result<()> {
    let diff = max_abs_diff(a.view(), b.view())?;
    match first_mismatch(a.view(), b.view(), tolerance)? {
        None => {
            info!(max_abs_diff = diff, tolerance, "outputs match");
            Ok(())
        }
        Some((i, j, x, y)) => {
            warn!(row = i + 1, col = j + 1, x, y, max_abs_diff = diff, "outputs differ");
            bail!(
                "difference at row {} col {} ({} vs {}) exceeds tolerance {}",
                i + 1,
                j + 1,
                x,
                y,
                tolerance
            )
        }
    }
}

fn compare(a: &Path, b: &Path, tolerance: f64) -> Result<()> {
    let ma = read_matrix(a).with_context(|| format!("Failed to read {}", a.display()))?;
    let mb = read_matrix(b).with_context(|| format!("Failed to read {}", b.display()))?;
    if ma.dim() != mb.dim() {
        bail!("shapes differ: {:?} vs {:?}", ma.dim(), mb.dim());
    }
    check_close(&ma, &mb, tolerance)
}

fn generate(cmd: GenerateCommand) -> Result<()> {
    let stimulus = Stimulus::random(
        cmd.seq_len,
        cmd.embed_dim,
        cmd.distribution,
        cmd.scale,
        cmd.seed,
    )?;
    stimulus
        .save(&StimulusFiles::in_dir(&cmd.output_dir))
        .with_context(|| format!("Failed to write {}", cmd.output_dir.display()))?;
    info!(
        dir = %cmd.output_dir.display(),
        seq_len = cmd.seq_len,
        embed_dim = cmd.embed_dim,
        seed = cmd.seed,
        "stimulus written"
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let settings = match &cli.config {
        Some(path) => SimSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => SimSettings::default(),
    };

    match cli.command {
        Commands::Run(cmd) => run(settings, cmd),
        Commands::Reference(cmd) => reference(settings, cmd),
        Commands::Analyze { file } => {
            let matrix = read_matrix(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            println!("{}", analyze_bits(&file.display().to_string(), &matrix));
            Ok(())
        }
        Commands::Compare { a, b, tolerance } => compare(&a, &b, tolerance),
        Commands::Generate(cmd) => generate(cmd),
    }
}
