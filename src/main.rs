use std::io::{self, Read};

use anyhow::Result;
use clap::Parser;
use glossary_translator_rust::{Category, Config};

#[derive(Parser, Debug)]
#[command(
    name = "glossary-translator-rust",
    version,
    about = "Resolve game UI strings through a glossary, a cache and an LLM fallback"
)]
struct Cli {
    /// Target language (default: settings [system] target_lang)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Category for lines without a `category<TAB>` prefix
    /// (action, npc, item, object, dialogue, interface, default)
    #[arg(short = 'c', long = "category", default_value = "default")]
    category: Category,

    /// Model name or provider:model (e.g. openai:MODEL_ID)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Directory holding <lang>/<category>.tsv glossary files
    #[arg(long = "glossary-dir")]
    glossary_dir: Option<String>,

    /// Directory for the per-language translation caches
    #[arg(long = "cache-dir")]
    cache_dir: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    glossary_translator_rust::logging::init(cli.verbose)?;

    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;

    let config = Config {
        lang: cli.lang,
        category: cli.category,
        model: cli.model,
        key: cli.key,
        settings_path: cli.read_settings,
        glossary_dir: cli.glossary_dir,
        cache_dir: cli.cache_dir,
    };
    let output = glossary_translator_rust::run(config, input).await?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
