use std::cmp;
use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use atty::Stream;
use clap::{Parser, Subcommand};
use glossary_tooltip_rs::{
    ExclusionScope, FilterConfig, FilterOutput, GlossaryStore, TermEntry, TermMapProvider,
    process,
};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(
    name = "glossary-tooltip-rs",
    about = "Annotate HTML with glossary tooltips",
    version
)]
pub struct Cli {
    /// Emit JSON instead of plain output.
    #[arg(long, global = true)]
    json: bool,

    /// Language code used to pick term translations.
    #[arg(long, global = true, default_value = "en")]
    lang: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wrap glossary terms found in an HTML fragment.
    Annotate {
        /// JSON glossary file (array of term records).
        #[arg(short, long)]
        terms: PathBuf,
        /// HTML fragment to annotate; reads stdin when omitted.
        input: Option<PathBuf>,
        /// Skip text anywhere below an excluded tag, not just direct children.
        #[arg(long)]
        ancestors: bool,
        /// Additional tag whose text is left alone (repeatable).
        #[arg(long = "exclude", value_name = "TAG")]
        exclude: Vec<String>,
    },
    /// List the dictionary that would be used for the language.
    Terms {
        /// JSON glossary file (array of term records).
        #[arg(short, long)]
        terms: PathBuf,
        /// Only list keys starting with this prefix.
        #[arg(short, long, default_value = "")]
        prefix: String,
        /// Maximum number of terms to list.
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Serve the annotation API over HTTP.
    #[cfg(feature = "web")]
    Serve {
        /// JSON glossary file (array of term records).
        #[arg(short, long)]
        terms: PathBuf,
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
    },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Annotate {
            terms,
            input,
            ancestors,
            exclude,
        } => handle_annotate(terms, input, ancestors, exclude, &cli.lang, cli.json),
        Command::Terms {
            terms,
            prefix,
            limit,
        } => handle_terms(terms, prefix, limit, &cli.lang, cli.json),
        #[cfg(feature = "web")]
        Command::Serve { terms, addr } => handle_serve(terms, addr, cli.lang),
    }
}

fn handle_annotate(
    terms: PathBuf,
    input: Option<PathBuf>,
    ancestors: bool,
    exclude: Vec<String>,
    lang: &str,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let store = GlossaryStore::load(&terms)?;
    let dictionary = store.term_map(lang)?;
    let html = read_input(input)?;

    let mut config = FilterConfig::default();
    config.excluded_tags.extend(exclude);
    if ancestors {
        config.exclusion_scope = ExclusionScope::Ancestors;
    }
    let output = process(&html, &dictionary, &config);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&output_to_json(&output))?);
    } else {
        print!("{}", output.html);
        if !output.html.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

fn handle_terms(
    terms: PathBuf,
    prefix: String,
    limit: usize,
    lang: &str,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let limit = cmp::max(1, limit);
    let store = GlossaryStore::load(&terms)?;
    let dictionary = store.term_map(lang)?;
    let rows = dictionary.prefix(&prefix, limit);

    if as_json {
        let payload = json!({
            "langcode": lang,
            "prefix": prefix,
            "limit": limit,
            "total": dictionary.len(),
            "results": rows.iter().map(|entry| {
                json!({"key": entry.key, "label": entry.label, "tid": entry.tid})
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_terms_table(&prefix, &rows);
    }
    Ok(())
}

#[cfg(feature = "web")]
fn handle_serve(
    terms: PathBuf,
    addr: std::net::SocketAddr,
    lang: String,
) -> Result<(), Box<dyn Error>> {
    use glossary_tooltip_rs::web::{WebConfig, serve};

    let store = GlossaryStore::load(&terms)?;
    let config = WebConfig {
        addr,
        default_langcode: lang,
        ..WebConfig::default()
    };
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(store, config))?;
    Ok(())
}

fn read_input(input: Option<PathBuf>) -> Result<String, Box<dyn Error>> {
    match input {
        Some(path) => fs::read_to_string(&path).map_err(|err| {
            Box::<dyn Error>::from(format!("Failed to read {}: {err}", path.display()))
        }),
        None => {
            if atty::is(Stream::Stdin) {
                return Err("No input: pass an HTML file or pipe markup on stdin".into());
            }
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn output_to_json(output: &FilterOutput) -> serde_json::Value {
    json!({
        "html": output.html,
        "used_term_ids": output.used_term_ids,
        "cache_tags": output.cache_tags(),
        "attachments": output.attachments,
    })
}

fn print_terms_table(prefix: &str, rows: &[&TermEntry]) {
    if rows.is_empty() {
        println!("No terms matched prefix \"{prefix}\".");
        return;
    }
    let width = rows
        .iter()
        .map(|entry| entry.key.chars().count())
        .max()
        .unwrap_or(prefix.len())
        .max("KEY".len());
    println!("{:<width$}  {:>6}  {}", "KEY", "TID", "LABEL", width = width);
    println!("{:-<width$}  {:->6}  {}", "", "", "-----", width = width);
    for entry in rows {
        println!(
            "{:<width$}  {:>6}  {}",
            entry.key,
            entry.tid,
            entry.label,
            width = width
        );
    }
}
