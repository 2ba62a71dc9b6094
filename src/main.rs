use anyhow::{Context, Result};
use clap::Parser;
use memvis::cli::{Cli, OutputFormat};
use memvis::config::AnalyzerConfig;
use memvis::pipeline::Pipeline;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let base = match &args.config {
        Some(path) => AnalyzerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AnalyzerConfig::default(),
    };
    let config = args.apply_overrides(base);

    let files = args.input_files();
    if files.is_empty() {
        anyhow::bail!("No files were supplied.");
    }

    if !args.quiet {
        eprintln!(
            "Files are {:?}. Page size is {}KB.",
            files, config.page_size_kb
        );
    }

    let pipeline = Pipeline::new(config, args.quiet).context("Failed to prepare analysis")?;
    let summary = pipeline.run(&files).context("Analysis aborted")?;

    match args.format {
        OutputFormat::Text => print!("{}", summary.to_text()),
        OutputFormat::Json => println!("{}", summary.to_json()?),
    }

    Ok(())
}
