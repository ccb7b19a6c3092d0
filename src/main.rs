use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use report_templates::deck::{GenerationOutcome, ReportDeck, DEFAULT_CONCURRENCY};
use report_templates::parser::{self, render_template};
use report_templates::render::{self, DEFAULT_EXPORT_PREFIX};
use report_templates::synthesis::{build_prompt, CommandSynthesizer, GenerationConfig};
use report_templates::templates::{self, BUILTIN_CONTEXT, BUILTIN_REPORTS};
use report_templates::Report;

const SYNTH_CMD_ENV: &str = "REPORTS_SYNTH_CMD";

#[derive(Parser)]
#[command(name = "report_templates", about = "Parse, render and fill delimited report templates")]
struct Cli {
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    /// File whose contents are attached to every report as shared context
    /// (default: the built-in system description)
    #[arg(long, global = true, value_name = "FILE")]
    context: Option<PathBuf>,
    /// Attach no shared context at all
    #[arg(long, global = true, conflicts_with = "context")]
    no_context: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse template files (or the built-in templates) into report records
    Parse {
        /// Template files; the built-in templates when omitted
        files: Vec<PathBuf>,
        /// Reject blocks without a title and sections without a heading
        #[arg(long)]
        strict: bool,
    },
    /// Reports overview table
    List {
        /// Template file (default: built-in templates)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Show one report as markdown
    Show {
        id: String,
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print one report re-serialized in template form
    Template {
        id: String,
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print the content-synthesis prompt for one report
    Prompt {
        id: String,
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Write one report as markdown under its suggested filename
    Export {
        id: String,
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// Filename prefix
        #[arg(long, default_value = DEFAULT_EXPORT_PREFIX)]
        prefix: String,
    },
    /// Fill reports through an external content-synthesis command
    Generate {
        /// Report id (e.g. report-1)
        id: Option<String>,
        /// Generate every report
        #[arg(long, conflicts_with = "id")]
        all: bool,
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Synthesis program (falls back to $REPORTS_SYNTH_CMD)
        #[arg(long = "command", value_name = "PROG")]
        program: Option<String>,
        /// Extra argument for the synthesis program (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Max requests in flight with --all (1-64)
        #[arg(long, default_value_t = DEFAULT_CONCURRENCY, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..=64))]
        concurrency: usize,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        /// Per-request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let context = load_context(&cli)?;
    let json = cli.json;

    let result = match cli.command {
        Commands::Parse { files, strict } => {
            let sources = parse_sources(&files, context.as_deref(), strict)?;
            if json {
                match sources.as_slice() {
                    [(_, reports)] => print_json(reports)?,
                    _ => {
                        let wrapped: Vec<_> = sources
                            .iter()
                            .map(|(source, reports)| serde_json::json!({ "source": source, "reports": reports }))
                            .collect();
                        print_json(&wrapped)?;
                    }
                }
            } else {
                for (source, reports) in &sources {
                    let sections: usize = reports.iter().map(|r| r.sections.len()).sum();
                    println!("{}: {} reports, {} sections", source, reports.len(), sections);
                }
            }
            Ok(())
        }
        Commands::List { file } => {
            let reports = load_reports(file.as_deref(), context.as_deref())?;
            if json {
                print_json(&reports)?;
            } else if reports.is_empty() {
                println!("No reports found.");
            } else {
                print!("{}", render::overview_table(&reports));
                println!("\n{} reports", reports.len());
            }
            Ok(())
        }
        Commands::Show { id, file } => {
            let reports = load_reports(file.as_deref(), context.as_deref())?;
            let report = find_report(&reports, &id)?;
            if json {
                print_json(report)?;
            } else {
                print!("{}", render::render_markdown(report));
            }
            Ok(())
        }
        Commands::Template { id, file } => {
            let reports = load_reports(file.as_deref(), context.as_deref())?;
            let report = find_report(&reports, &id)?;
            let template = render_template(report);
            if json {
                print_json(&serde_json::json!({ "id": report.id, "template": template }))?;
            } else {
                print!("{}", template);
            }
            Ok(())
        }
        Commands::Prompt { id, file } => {
            let reports = load_reports(file.as_deref(), context.as_deref())?;
            let prompt = build_prompt(find_report(&reports, &id)?);
            if json {
                print_json(&prompt)?;
            } else {
                println!("SYSTEM:\n{}\n\nPROMPT:\n{}", prompt.system_instruction, prompt.contents);
            }
            Ok(())
        }
        Commands::Export { id, file, out, prefix } => {
            let reports = load_reports(file.as_deref(), context.as_deref())?;
            let report = find_report(&reports, &id)?;
            std::fs::create_dir_all(&out)
                .with_context(|| format!("Failed to create {}", out.display()))?;
            let path = out.join(render::export_filename(&prefix, report, "md"));
            std::fs::write(&path, render::render_markdown(report))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Exported {} to {}", report.id, path.display());
            if json {
                print_json(&serde_json::json!({ "id": report.id, "path": path }))?;
            } else {
                println!("{}", path.display());
            }
            Ok(())
        }
        Commands::Generate {
            id,
            all,
            file,
            program,
            args,
            concurrency,
            model,
            temperature,
            timeout,
        } => {
            let reports = load_reports(file.as_deref(), context.as_deref())?;
            let mut config = GenerationConfig::default();
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(t) = temperature {
                config.temperature = t;
            }
            if let Some(secs) = timeout {
                config.timeout = Duration::from_secs(secs);
            }
            let synth = synthesizer(program, args, config.clone())?;
            let mut deck = ReportDeck::new(reports);

            let outcomes = match (id, all) {
                (_, true) => deck.generate_all(Arc::new(synth), &config, concurrency).await,
                (Some(id), false) => vec![deck.generate(&id, &synth, &config).await?],
                (None, false) => bail!("Pass a report id or --all"),
            };

            let touched: Vec<&Report> = outcomes
                .iter()
                .filter_map(|o| match o {
                    GenerationOutcome::Updated { report_id, .. } => Some(report_id.as_str()),
                    GenerationOutcome::Failed(n) => Some(n.report_id.as_str()),
                })
                .filter_map(|id| deck.get(id))
                .collect();

            if json {
                print_json(&serde_json::json!({ "outcomes": outcomes, "reports": touched }))?;
            } else {
                for outcome in &outcomes {
                    if let GenerationOutcome::Failed(notice) = outcome {
                        eprintln!("warning: {}: {}", notice.report_id, notice.message);
                    }
                }
                for report in touched {
                    println!("{}", render::render_markdown(report));
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn load_context(cli: &Cli) -> Result<Option<String>> {
    if cli.no_context {
        return Ok(None);
    }
    match &cli.context {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read context file {}", path.display()))?;
            Ok(Some(text))
        }
        None => Ok(Some(BUILTIN_CONTEXT.to_string())),
    }
}

fn load_reports(file: Option<&Path>, context: Option<&str>) -> Result<Vec<Report>> {
    match file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(parser::parse(&raw, context))
        }
        None if context == Some(BUILTIN_CONTEXT) => Ok(templates::builtin_reports()),
        None => Ok(parser::parse(BUILTIN_REPORTS, context)),
    }
}

/// Parse each file on the rayon pool; order of `files` is kept.
fn parse_sources(
    files: &[PathBuf],
    context: Option<&str>,
    strict: bool,
) -> Result<Vec<(String, Vec<Report>)>> {
    let parse_one = |label: String, raw: &str| -> Result<(String, Vec<Report>)> {
        let reports = if strict {
            parser::parse_strict(raw, context).with_context(|| format!("Invalid templates in {}", label))?
        } else {
            parser::parse(raw, context)
        };
        Ok((label, reports))
    };

    if files.is_empty() {
        return Ok(vec![parse_one("builtin".to_string(), BUILTIN_REPORTS)?]);
    }

    files
        .par_iter()
        .map(|path| {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            parse_one(path.display().to_string(), &raw)
        })
        .collect()
}

fn find_report<'a>(reports: &'a [Report], id: &str) -> Result<&'a Report> {
    reports
        .iter()
        .find(|r| r.id == id)
        .with_context(|| format!("No report with id '{}' ({} reports loaded)", id, reports.len()))
}

fn synthesizer(
    program: Option<String>,
    args: Vec<String>,
    config: GenerationConfig,
) -> Result<CommandSynthesizer> {
    if let Some(program) = program {
        return Ok(CommandSynthesizer::new(program, args, config));
    }
    let from_env = std::env::var(SYNTH_CMD_ENV)
        .with_context(|| format!("Pass --command or set {}", SYNTH_CMD_ENV))?;
    let mut parts = from_env.split_whitespace().map(str::to_string);
    let Some(program) = parts.next() else {
        bail!("{} is empty", SYNTH_CMD_ENV);
    };
    let mut all_args: Vec<String> = parts.collect();
    all_args.extend(args);
    Ok(CommandSynthesizer::new(program, all_args, config))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
