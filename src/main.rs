use std::{path::PathBuf, process::ExitCode};

use clap::Parser as ClapParser;
use colored::Colorize;
use phaseflow::{
    cache::SessionTable,
    config::{ConfigKey, Configuration},
    error::Result,
    intern::InternedSymbol,
    middle::{
        lir::{self, pretty_print::pretty_print_module},
        pipeline::{LirTypes, LoweringContext, LoweringPipeline, real_refinement_cache},
        sample::{platform_actuals, sample_module},
    },
    phase::{DefaultPhaseRunner, DumpSink, FileSink, StdoutSink},
    refinement::{ModuleDescriptor, RealRefinementCache},
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Print every phase of the pipeline and exit
    #[arg(long)]
    list_phases: bool,

    /// Phases to skip (`ALL` for every phase)
    #[arg(long, value_delimiter = ',')]
    disable: Vec<String>,

    /// Phases whose bodies log extra detail
    #[arg(long, value_delimiter = ',')]
    verbose: Vec<String>,

    /// Phases whose input is dumped
    #[arg(long, value_delimiter = ',')]
    dump_before: Vec<String>,

    /// Phases whose output is dumped
    #[arg(long, value_delimiter = ',')]
    dump_after: Vec<String>,

    /// Phases dumped both before and after
    #[arg(long, value_delimiter = ',')]
    dump: Vec<String>,

    /// Module or function names that are never dumped
    #[arg(long, value_delimiter = ',')]
    exclude_from_dump: Vec<String>,

    /// Report how long each phase took
    #[arg(long)]
    time_phases: bool,

    /// Write dumps to this file instead of stdout
    #[arg(long)]
    dump_file: Option<PathBuf>,

    /// Lower without a refinement cache
    #[arg(long)]
    no_refinement: bool,
}

impl Args {
    fn configuration(&self) -> Configuration {
        Configuration::new()
            .with_names(ConfigKey::DisablePhases, &self.disable)
            .with_names(ConfigKey::VerbosePhases, &self.verbose)
            .with_names(ConfigKey::DumpBefore, &self.dump_before)
            .with_names(ConfigKey::DumpAfter, &self.dump_after)
            .with_names(ConfigKey::Dump, &self.dump)
            .with_names(ConfigKey::ExcludeFromDump, &self.exclude_from_dump)
            .with_flag(ConfigKey::TimePhases, self.time_phases)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}: {error}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = args.configuration();
    let pipeline = LoweringPipeline::new(&config)?;

    if args.list_phases {
        for listing in pipeline.registry().list() {
            println!("{listing}");
        }
        return Ok(());
    }

    let module = sample_module();

    // One refinement cache per module name for the whole session
    let sessions: SessionTable<InternedSymbol, RealRefinementCache<LirTypes>> =
        SessionTable::open();
    let cache = if args.no_refinement {
        None
    } else {
        Some(sessions.get_or_create(module.name, |_| real_refinement_cache())?)
    };

    let context = LoweringContext::new(
        ModuleDescriptor::new(module.name, cache.clone()),
        platform_actuals(),
    );

    let lowered = match &args.dump_file {
        Some(path) => lower(&pipeline, &context, &config, FileSink::create(path)?, module)?,
        None => lower(&pipeline, &context, &config, StdoutSink, module)?,
    };

    if let Some(cache) = &cache {
        debug!(
            refined = cache.cached_type_count(),
            scopes = cache.cached_scope_count(),
            "refinement cache"
        );
    }
    sessions.close();

    print!("{}", pretty_print_module(&lowered));

    Ok(())
}

fn lower<S: DumpSink>(
    pipeline: &LoweringPipeline,
    context: &LoweringContext,
    config: &Configuration,
    sink: S,
    module: lir::Module,
) -> Result<lir::Module> {
    let runner = DefaultPhaseRunner::new(config, sink);

    pipeline.lower(context, &runner, &runner, module)
}
