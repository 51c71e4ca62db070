#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for Gmail filters: convert exports and apply rules over IMAP

use clap::{ArgGroup, Parser, Subcommand};
use gmailfilters::{
    BulkJob, Change, Collapse, CompileOptions, Config, ExecutionOptions, ExecutionReport,
    ExportDocument, FilterClient, Flag, FolderPattern, FolderState, MessageSummary, Outcome,
    QueryState, RuleFile, compile, to_export, to_flat,
};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gmf")]
#[command(about = "Manage Gmail filters and apply them over IMAP")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file
    #[arg(short = 'f', long, global = true)]
    config: Option<PathBuf>,

    /// Account to use
    #[arg(short, long, global = true, default_value = gmailfilters::DEFAULT_ACCOUNT)]
    account: String,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a rule file to folders
    Apply {
        /// TOML rule file
        rules: PathBuf,

        /// Folder globs or @flag patterns (default: @all)
        folders: Vec<String>,

        /// Messages per request
        #[arg(short = 's', long)]
        chunk_size: Option<usize>,

        /// Ignore Gmail's ^smartlabel filters
        #[arg(short = 'S', long = "skip-smartlabels")]
        skip_smart_labels: bool,

        /// Fail when a search matches nothing (single folder only)
        #[arg(long)]
        fail_if_empty: bool,
    },

    /// Run one query with actions given on the command line
    Bulk {
        /// Folder globs or @flag patterns (default: @all)
        folders: Vec<String>,

        /// Gmail search query (default: all messages)
        #[arg(short = 'Q', long)]
        query: Option<String>,

        /// Flag to add (+name or name) or remove (-name)
        #[arg(short = 'F', long = "flag", allow_hyphen_values = true, value_parser = parse_flag)]
        flags: Vec<Change<Flag>>,

        /// Label to add (+name or name) or remove (-name)
        #[arg(short = 'L', long = "label", allow_hyphen_values = true, value_parser = parse_label)]
        labels: Vec<Change<String>>,

        /// Delete matching messages
        #[arg(short = 'D', long)]
        delete: bool,

        /// Print matching messages
        #[arg(short = 'S', long)]
        show: bool,

        /// Messages per request
        #[arg(short = 's', long)]
        chunk_size: Option<usize>,

        /// Fail when the search matches nothing (single folder only)
        #[arg(long)]
        fail_if_empty: bool,
    },

    /// Convert between the rule file and Gmail's export format
    #[command(group(ArgGroup::new("direction").required(true).args(["to_xml", "from_xml"])))]
    Filters {
        /// Read a rule file, write an export document
        #[arg(long)]
        to_xml: bool,

        /// Read an export document, write a rule file
        #[arg(long)]
        from_xml: bool,

        /// Input file (default: stdin)
        input: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep entries that differ only by label separate
        #[arg(short = 'n', long)]
        no_collapse: bool,
    },

    /// List IMAP folders with their attributes
    Folders,

    /// Print the configuration with passwords hidden
    DumpConfig,
}

fn parse_flag(s: &str) -> Result<Change<Flag>, String> {
    Change::<Flag>::parse_flag(s).map_err(|e| e.to_string())
}

#[allow(clippy::unnecessary_wraps)]
fn parse_label(s: &str) -> Result<Change<String>, String> {
    Ok(Change::<String>::parse_label(s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Command::Apply {
            rules,
            folders,
            chunk_size,
            skip_smart_labels,
            fail_if_empty,
        } => {
            let config = load_config(&args)?;
            let options = execution_options(&config, *chunk_size, *fail_if_empty);
            let client = client(&config, &args)?;

            let file = RuleFile::load(rules)?;
            let compiled = compile(
                &file.filters,
                &CompileOptions {
                    skip_smart_labels: *skip_smart_labels,
                },
            );
            info!("Loaded {} rules from {}", compiled.len(), rules.display());

            let patterns = FolderPattern::parse_all(folders);
            let report = client.apply_filters(&compiled, &patterns, options).await?;
            print_report(&args, &report)?;
        }
        Command::Bulk {
            folders,
            query,
            flags,
            labels,
            delete,
            show,
            chunk_size,
            fail_if_empty,
        } => {
            let config = load_config(&args)?;
            let options = execution_options(&config, *chunk_size, *fail_if_empty);
            let client = client(&config, &args)?;

            let job = BulkJob {
                query: query.clone(),
                flags: flags.clone(),
                labels: labels.clone(),
                delete: *delete,
                show: *show,
            };
            let patterns = FolderPattern::parse_all(folders);
            let report = client.bulk(&job, &patterns, options).await?;
            print_report(&args, &report)?;
        }
        Command::Filters {
            to_xml,
            from_xml: _,
            input,
            output,
            no_collapse,
        } => {
            let text = read_input(input.as_deref())?;
            let converted = if *to_xml {
                let file = RuleFile::parse(&text)?;
                to_export(&file.filters, chrono::Utc::now()).to_xml()?
            } else {
                let collapse = if *no_collapse {
                    Collapse::Never
                } else {
                    Collapse::Adjacent
                };
                let doc = ExportDocument::from_xml(&text)?;
                RuleFile {
                    filters: to_flat(&doc, collapse),
                }
                .to_toml_string()?
            };
            write_output(output.as_deref(), &converted)?;
        }
        Command::Folders => {
            let config = load_config(&args)?;
            let folders = client(&config, &args)?.list_folders().await?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&folders)?);
            } else {
                for folder in &folders {
                    println!(
                        "({}) {} {}",
                        folder.attributes.join(" "),
                        folder.delimiter.as_deref().unwrap_or("NIL"),
                        folder.name
                    );
                }
            }
        }
        Command::DumpConfig => {
            let config = load_config(&args)?.redacted();
            if let Some(source) = &config.source {
                info!("Configuration read from {}", source.display());
            }
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    Ok(Config::load(args.config.as_deref())?)
}

fn client(config: &Config, args: &Args) -> anyhow::Result<FilterClient> {
    Ok(FilterClient::new(config.account(&args.account)?.clone()))
}

fn execution_options(
    config: &Config,
    chunk_size: Option<usize>,
    fail_if_empty: bool,
) -> ExecutionOptions {
    ExecutionOptions {
        chunk_size: chunk_size.unwrap_or(config.chunk_size),
        fail_if_empty,
    }
}

fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(p) if p != Path::new("-") => Ok(std::fs::read_to_string(p)?),
        _ => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn write_output(path: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match path {
        Some(p) if p != Path::new("-") => std::fs::write(p, text)?,
        _ => std::io::stdout().write_all(text.as_bytes())?,
    }
    Ok(())
}

fn print_report(args: &Args, report: &ExecutionReport) -> anyhow::Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for folder in &report.folders {
        match &folder.state {
            FolderState::Selected { exists } => println!("{} ({exists} messages)", folder.folder),
            FolderState::SelectFailed(e) => {
                println!("{}: select failed: {e}", folder.folder);
                continue;
            }
        }

        for query in &folder.queries {
            let state = match &query.state {
                QueryState::Empty => "no matches".to_string(),
                QueryState::Processed => format!("{} matched", query.matched),
                QueryState::SearchFailed(e) => format!("search failed: {e}"),
                QueryState::Skipped(reason) => format!("skipped: {reason}"),
            };
            println!("  {}: {state}", display_query(&query.query));

            for chunk in &query.chunks {
                for action in &chunk.actions {
                    match &action.outcome {
                        Outcome::Applied => {}
                        Outcome::Failed(e) => println!("    {} failed: {e}", action.action),
                        Outcome::Skipped(reason) => println!("    skipped: {reason}"),
                    }
                }
                print_messages(&chunk.messages);
            }
        }
    }

    println!(
        "\n{} message(s) matched, {} failure(s)",
        report.matched(),
        report.failures()
    );
    Ok(())
}

fn display_query(query: &str) -> &str {
    if query.is_empty() { "(no query)" } else { query }
}

fn print_messages(messages: &[MessageSummary]) {
    for message in messages {
        println!(
            "    {:<8} {:<30} {}",
            message.uid,
            truncate(&message.from.join(", "), 28),
            truncate(&message.subject, 60),
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
