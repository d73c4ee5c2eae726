use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use formfill::pipeline::{init_default_config, CliOverrides, FormFiller, PipelineConfig};
use formfill::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "formfill")]
#[command(about = "Detect placeholders in a DOCX and fill them without losing formatting", long_about = None)]
struct Args {
    /// Write a default formfill.toml, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory for --init-config (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input .docx
    #[arg(value_name = "DOCX")]
    input: Option<PathBuf>,

    /// Output .docx (default: <input_stem>_filled.docx)
    #[arg(short, long, value_name = "DOCX")]
    output: Option<PathBuf>,

    /// Fill request: JSON object of "fill key": "value"
    #[arg(long, value_name = "JSON")]
    values: Option<PathBuf>,

    /// Write detected occurrences with their surrounding text as JSON
    #[arg(long, value_name = "JSON")]
    detect_json: Option<PathBuf>,

    /// Config file path (default: search for formfill.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Containers scanned backwards for the keyword of a `text#@keyword` key
    #[arg(long, value_name = "N")]
    anchor_lookback: Option<usize>,

    /// How a bare placeholder key is applied: first (default) | all
    #[arg(long, value_name = "SCOPE")]
    raw_keys: Option<String>,

    /// Characters of context around each occurrence in --detect-json
    #[arg(long, value_name = "N")]
    context_window: Option<usize>,

    /// Write per-container before/after snapshots into the trace directory
    #[arg(long)]
    trace: bool,

    /// No progress output on stderr
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let input = match args.input {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  formfill form.docx                      list placeholders\n  formfill form.docx --detect-json d.json  export occurrences with context\n  formfill form.docx --values v.json       fill and write form_filled.docx\n"
            );
            return Ok(());
        }
    };

    let overrides = CliOverrides {
        anchor_lookback: args.anchor_lookback,
        raw_keys: args.raw_keys,
        context_window: args.context_window,
        trace: args.trace.then_some(true),
    };
    let cfg = PipelineConfig::from_paths_and_args(
        &input,
        args.output.as_deref(),
        args.config,
        &overrides,
    )
    .context("build config")?;
    let output = args
        .output
        .unwrap_or_else(|| cfg.default_output_path(&input));

    let mut filler = FormFiller::new(cfg, progress);

    if args.values.is_none() || args.detect_json.is_some() {
        let view = filler.detect_docx(&input, args.detect_json.as_deref())?;
        if args.values.is_none() && args.detect_json.is_none() {
            for (text, count) in &view.occurrences_summary {
                println!("{count:>4}  {text}");
            }
        }
    }

    if let Some(values) = args.values.as_ref() {
        let report = filler.fill_docx(&input, values, &output)?;
        if !report.all_succeeded() {
            eprintln!(
                "{} of {} keys were not applied",
                report.failed,
                report.outcomes.len()
            );
            std::process::exit(1);
        }
    }
    Ok(())
}
