use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use clap::Subcommand;
use miette::IntoDiagnostic;
use miette::WrapErr;
use row_formula::headers::{self, HeaderMapping};
use row_formula::table::SOURCE_FIELDS;
use row_formula::template::{Template, TemplateStore};
use row_formula::{Formula, Lexer, Limits, Table, rules};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Apply sandboxed arithmetic formulas to CSV columns")]
struct Args {
    /// Log filter used when RUST_LOG is not set (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Largest formula accepted, in expression nodes.
    #[arg(long, global = true, default_value_t = Limits::default().max_nodes)]
    max_nodes: usize,

    /// Deepest nesting accepted in a formula.
    #[arg(long, global = true, default_value_t = Limits::default().max_depth)]
    max_depth: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the tokens of a formula.
    Tokenize { formula: String },
    /// Validate a formula and print its expression tree.
    Check { formula: String },
    /// Apply a formula to a column of a CSV or xlsx file and write the result as CSV.
    Apply {
        input: PathBuf,
        #[arg(long)]
        column: String,
        #[arg(long)]
        formula: String,
        /// Defaults to stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Suggest canonical names for the headers of a CSV file.
    Headers { input: PathBuf },
    /// Report rows missing required fields.
    ValidateRows { input: PathBuf },
    /// Manage saved templates.
    Template {
        #[arg(long, default_value = "templates")]
        dir: PathBuf,
        #[command(subcommand)]
        command: TemplateCommands,
    },
    /// Write an empty source table with the chosen fields.
    Blank {
        /// Repeat for each column; defaults to the standard source fields.
        #[arg(long = "field")]
        fields: Vec<String>,
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..=100))]
        rows: u16,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Apply a saved template to a CSV or xlsx file and export it with mapped headers.
    Import {
        input: PathBuf,
        #[arg(long)]
        template: String,
        #[arg(long, default_value = "templates")]
        dir: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum TemplateCommands {
    /// Save a template from header mappings and column formulas.
    Save {
        name: String,
        /// `SOURCE=CANONICAL`; an empty canonical name leaves the header unmapped.
        #[arg(long = "map", value_parser = parse_pair)]
        maps: Vec<(String, String)>,
        /// `COLUMN=FORMULA`
        #[arg(long = "formula", value_parser = parse_pair)]
        formulas: Vec<(String, String)>,
    },
    /// List saved templates.
    List,
    /// Print a saved template.
    Show { name: String },
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.trim().is_empty() {
        return Err(format!("missing key in `{raw}`"));
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn main() -> miette::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase())),
        )
        .with_writer(io::stderr)
        .try_init()
        .ok();

    let limits = Limits {
        max_nodes: args.max_nodes,
        max_depth: args.max_depth,
    };

    match args.command {
        Commands::Tokenize { formula } => {
            for token in Lexer::new(&formula) {
                println!("{}", token?);
            }
            println!("EOF");
        }
        Commands::Check { formula } => {
            let formula = Formula::with_limits(formula, &limits)?;
            println!("{}", formula.expr());
            let variables = formula.expr().variables();
            if !variables.is_empty() {
                println!("reads: {}", variables.join(", "));
            }
        }
        Commands::Apply {
            input,
            column,
            formula,
            output,
        } => {
            let formula = Formula::with_limits(formula, &limits)?;
            let table = read_table(&input)?;
            let applied = formula.apply(&table, &column);
            for (row, error) in applied.failures() {
                eprintln!("row {row}: {error}");
            }
            write_table(&applied.table, None, output.as_deref())?;
        }
        Commands::Headers { input } => {
            let table = read_table(&input)?;
            let mapping = headers::map_headers(table.columns());
            println!(
                "{}",
                serde_json::to_string_pretty(&mapping).into_diagnostic()?
            );
        }
        Commands::ValidateRows { input } => {
            let table = read_table(&input)?;
            let mapping = headers::map_headers(table.columns());
            let issues = rules::check_required(&table, &mapping);
            if issues.is_empty() {
                println!("All rows passed validation.");
            } else {
                for issue in &issues {
                    println!("{issue}");
                }
                std::process::exit(1);
            }
        }
        Commands::Template { dir, command } => {
            let store = TemplateStore::new(dir);
            match command {
                TemplateCommands::Save {
                    name,
                    maps,
                    formulas,
                } => {
                    let mut template = Template::new(name);
                    for (source, canonical) in maps {
                        let canonical = (!canonical.is_empty()).then_some(canonical);
                        template.header_mapping.insert(source, canonical);
                    }
                    for (column, text) in formulas {
                        Formula::with_limits(text.as_str(), &limits)
                            .wrap_err_with(|| format!("formula for column `{column}`"))?;
                        template.formulas.insert(column, text);
                    }
                    let path = store.save(&template).into_diagnostic()?;
                    println!("saved {}", path.display());
                }
                TemplateCommands::List => {
                    for name in store.list().into_diagnostic()? {
                        println!("{name}");
                    }
                }
                TemplateCommands::Show { name } => {
                    let template = store.load(&name).into_diagnostic()?;
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&template).into_diagnostic()?
                    );
                }
            }
        }
        Commands::Blank {
            fields,
            rows,
            output,
        } => {
            let table = if fields.is_empty() {
                Table::blank(SOURCE_FIELDS.iter().copied(), rows.into())
            } else {
                Table::blank(fields, rows.into())
            };
            write_table(&table, None, output.as_deref())?;
        }
        Commands::Import {
            input,
            template,
            dir,
            output,
        } => {
            let template = TemplateStore::new(dir)
                .load(&template)
                .into_diagnostic()?;
            let table = read_table(&input)?;
            info!(template = %template.name, rows = table.len(), "importing");

            let (table, outcomes) = template.apply_with(&table, &limits)?;
            for (column, outcomes) in &outcomes {
                for (index, outcome) in outcomes.iter().enumerate() {
                    if let Err(error) = outcome {
                        eprintln!("row {}, column `{column}`: {error}", index + 1);
                    }
                }
            }

            let mapping: HeaderMapping = if template.header_mapping.is_empty() {
                headers::map_headers(table.columns())
            } else {
                template.header_mapping.clone()
            };
            for issue in rules::check_required(&table, &mapping) {
                eprintln!("{issue}");
            }
            write_table(&table, Some(&mapping), output.as_deref())?;
        }
    }
    Ok(())
}

fn read_table(path: &Path) -> miette::Result<Table> {
    Table::read_path(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading `{}` failed", path.display()))
}

fn write_table(
    table: &Table,
    rename: Option<&HeaderMapping>,
    output: Option<&Path>,
) -> miette::Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("creating `{}` failed", path.display()))?;
            table
                .write_csv(file, rename)
                .into_diagnostic()
                .wrap_err_with(|| format!("writing `{}` failed", path.display()))
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            table.write_csv(&mut lock, rename).into_diagnostic()?;
            lock.flush().into_diagnostic()
        }
    }
}
