use anyhow::{Context, Result};
use clap::Parser;
use stratarank::cli::{Cli, OutputFormat, Preset};
use stratarank::config::EngineConfig;
use stratarank::filter::FilterCriteria;
use stratarank::heatmap::PercentileMatrix;
use stratarank::measurement::MeasurementTable;
use stratarank::output::{Facets, Report};
use stratarank::pipeline::AlertEngine;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(args: &Cli) -> Result<EngineConfig> {
    if let Some(path) = &args.config {
        return EngineConfig::from_toml(path);
    }

    let config = match args.preset {
        Preset::Default => EngineConfig::default(),
        Preset::Strict => EngineConfig::strict(),
        Preset::Permissive => EngineConfig::permissive(),
    };
    if args.no_default_thresholds {
        Ok(config)
    } else {
        config.with_default_thresholds()
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = load_config(&args)?;
    let engine = AlertEngine::new(config).context("Invalid engine configuration")?;
    tracing::debug!(
        "{} threshold rules, min population {}",
        engine.config().threshold.len(),
        engine.config().min_population
    );

    let records = MeasurementTable::load_records(&args.table)?;
    let enriched = engine.evaluate_records(records);

    if let Some(subject) = &args.matrix {
        let matrix = PercentileMatrix::for_subject(&enriched, subject)
            .with_context(|| format!("Unknown subject: {}", subject))?;
        println!("{}", serde_json::to_string_pretty(&matrix)?);
        return Ok(());
    }

    let view = if args.latest {
        enriched.latest_per_subject()
    } else {
        enriched
    };

    let criteria = FilterCriteria::from_exprs(&args.filter)?;

    let mut facets = Facets::new();
    for field in &args.facet {
        facets.insert(field.clone(), view.facet_counts(&criteria, field)?);
    }

    let filtered = view.filter(&criteria)?;
    let mut report = Report::new(filtered).with_facets(facets);
    if args.summary {
        report = report.with_summary();
    }

    match args.format {
        OutputFormat::Text => print!("{}", report.to_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Csv => print!("{}", report.to_csv()),
    }

    Ok(())
}
