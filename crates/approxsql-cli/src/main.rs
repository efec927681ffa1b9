use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use approxsql::{
    AliasGenerator, AqpConfig, InMemoryCatalog, SampleCatalog, TransformedQuery, parse_and_build,
    transform,
};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use comfy_table::presets::UTF8_FULL;

#[derive(Parser)]
#[command(name = "approxsql")]
#[command(about = "approxsql - approximate query rewriting over precomputed samples", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite a query against the samples of an offline catalog
    Rewrite {
        /// TOML sample catalog
        #[arg(long)]
        catalog: PathBuf,
        /// TOML session configuration
        #[arg(long)]
        config: Option<PathBuf>,
        sql: String,
    },
    /// Print the relation tree of a query as SQL, without sampling
    Explain { sql: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Rewrite {
            catalog,
            config,
            sql,
        } => {
            rewrite_query(&catalog, config.as_deref(), &sql)?;
        }
        Commands::Explain { sql } => {
            explain_query(&sql)?;
        }
    }

    Ok(())
}

fn rewrite_query(catalog_path: &Path, config_path: Option<&Path>, sql: &str) -> Result<()> {
    let catalog = InMemoryCatalog::load_from_file(catalog_path)
        .with_context(|| format!("Failed to load sample catalog {}", catalog_path.display()))?;
    let config = match config_path {
        Some(path) => AqpConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AqpConfig::default(),
    };

    let relation = parse_and_build(sql, &mut AliasGenerator::default())
        .context("Failed to build query")?;
    let transformed =
        transform(sql, &relation, &catalog, &config).context("Failed to rewrite query")?;

    println!("{}", transformed.sql);
    if !transformed.changed {
        println!("(no applicable sample, runs exactly)");
        return Ok(());
    }
    println!();
    print_samples(&transformed, &catalog);
    print_aggregates(&transformed);
    Ok(())
}

fn print_samples(transformed: &TransformedQuery, catalog: &InMemoryCatalog) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["original", "sample", "kind", "ratio", "rows"]);

    for sample in &transformed.samples {
        let rows = catalog
            .size_info_of(sample)
            .map(|size| format!("{} / {}", size.sample_rows, size.original_rows))
            .unwrap_or_else(|| "unknown".to_string());
        table.add_row(vec![
            sample.original.to_string(),
            sample.sample_table.to_string(),
            sample.kind.to_string(),
            sample.ratio.to_string(),
            rows,
        ]);
    }

    println!("{table}");
}

fn print_aggregates(transformed: &TransformedQuery) {
    if transformed.aggregates.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["column", "aggregate", "expression", "replicas", "note"]);

    for aggregate in &transformed.aggregates {
        let replicas = if aggregate.replicas.is_empty() {
            "-".to_string()
        } else {
            format!("{}..{}", aggregate.replicas.start, aggregate.replicas.end)
        };
        let note = if aggregate.low_confidence {
            "low confidence"
        } else {
            ""
        };
        table.add_row(vec![
            aggregate.output_name.clone(),
            aggregate.kind.as_str().to_string(),
            aggregate.expr.clone(),
            replicas,
            note.to_string(),
        ]);
    }

    println!("{table}");
    if transformed.trials > 0 {
        println!(
            "({} {} bootstrap trials, {}% confidence)",
            transformed.trials,
            transformed.bootstrap.as_str(),
            transformed.confidence * 100.0
        );
    }
}

fn explain_query(sql: &str) -> Result<()> {
    let relation = parse_and_build(sql, &mut AliasGenerator::default())
        .context("Failed to build query")?;
    println!("{}", relation.to_sql());

    let columns = relation.output_columns();
    if columns.is_empty() {
        println!("(0 columns)");
        return Ok(());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "column"]);
    for (i, column) in columns.iter().enumerate() {
        table.add_row(vec![(i + 1).to_string(), column.clone()]);
    }
    println!("{table}");
    println!("({} columns)", columns.len());
    Ok(())
}
