use std::path::Path;

use clap::Parser;
use docsift::{
    ConfigDb,
    DataDir,
    Engine,
    Error,
    Result,
    cli::{Cli, Command, ConfigAction, InitArgs, SearchArgs},
    config_db::{self, Settings},
    embedding::Query,
    engine::SearchHit,
    extract::ImageData,
    mcp,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSIFT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Init(args) => cmd_init(&config_db, &args)?,
        Command::Sync => {
            let settings = Settings::load(&config_db)?;
            let engine = Engine::from_settings(&data_dir, &settings)?;
            let report =
                engine.sync(settings.require_root()?, &settings.filter()?)?;

            for failure in &report.failed {
                eprintln!("  failed: {} ({})", failure.path, failure.error);
            }
            println!(
                "{} added, {} updated, {} repaired, {} deleted, {} unchanged, {} failed",
                report.added,
                report.updated,
                report.repaired,
                report.deleted,
                report.unchanged,
                report.failed.len()
            );
        }
        Command::Search(args) => {
            let settings = Settings::load(&config_db)?;
            let engine = Engine::from_settings(&data_dir, &settings)?;
            cmd_search(&engine, &args)?;
        }
        Command::Docs(args) => {
            let settings = Settings::load(&config_db)?;
            let engine = Engine::from_settings(&data_dir, &settings)?;
            let docs = engine.documents()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else if docs.is_empty() {
                println!("No documents indexed.");
            } else {
                for doc in &docs {
                    println!("#{:<6} {:>5} vectors  {}", doc.doc_id, doc.vectors, doc.path);
                }
                println!("\n{} document(s)", docs.len());
            }
        }
        Command::Forget { path } => {
            let settings = Settings::load(&config_db)?;
            let engine = Engine::from_settings(&data_dir, &settings)?;
            let info = engine.forget(&path)?;
            println!(
                "Removed #{} {} ({} vectors)",
                info.doc_id, info.path, info.vectors
            );
        }
        Command::Status(args) => {
            let settings = Settings::load(&config_db)?;
            let engine = Engine::from_settings(&data_dir, &settings)?;
            let stats = engine.stats()?;
            let root = settings.root.as_ref().map(|p| p.display().to_string());

            if args.json {
                let mut value = serde_json::to_value(&stats)?;
                value["data_dir"] = data_dir.root().display().to_string().into();
                value["root"] = root.into();
                println!("{value}");
            } else {
                println!("Data directory: {}", data_dir.root().display());
                println!(
                    "Root: {}",
                    root.as_deref().unwrap_or("(not configured, run `docsift init`)")
                );
                println!("Embedder: {}", stats.embedder);
                println!("Documents: {}", stats.documents);
                println!("Vectors: {}", stats.vectors);
                if let Some(dimension) = stats.dimension {
                    println!("Dimension: {dimension}");
                }
            }
        }
        Command::Config { action } => cmd_config(&config_db, action)?,
        Command::Mcp => {
            let settings = Settings::load(&config_db)?;
            let engine = Engine::from_settings(&data_dir, &settings)?;
            mcp::run_mcp(engine, settings)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_init(config_db: &ConfigDb, args: &InitArgs) -> Result<()> {
    let root = &args.root;
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "not a directory: {}",
            root.display()
        )));
    }
    let root = root.canonicalize()?;

    // Validate everything before storing anything.
    let mut settings = Settings::load(config_db)?;
    let extensions = args.extensions.as_ref().map(|e| e.join(","));
    let exclude = args.exclude.join(",");
    if let Some(ext) = &extensions {
        settings.apply(config_db::EXTENSIONS_KEY, ext)?;
    }
    settings.apply(config_db::EXCLUDE_KEY, &exclude)?;
    settings.filter()?;

    config_db.set_setting(config_db::ROOT_KEY, &root.to_string_lossy())?;
    if let Some(ext) = &extensions {
        config_db.set_setting(config_db::EXTENSIONS_KEY, ext)?;
    }
    if !args.exclude.is_empty() {
        config_db.set_setting(config_db::EXCLUDE_KEY, &exclude)?;
    }

    println!("Indexing root set to {}", root.display());
    println!("Run `docsift sync` to build the index.");
    Ok(())
}

fn cmd_search(engine: &Engine, args: &SearchArgs) -> Result<()> {
    let (query, label) = match (&args.query, &args.image) {
        (_, Some(path)) => (
            Query::Image(ImageData::from_path(path)?),
            format!("image {}", path.display()),
        ),
        (Some(text), None) => (Query::Text(text.clone()), text.clone()),
        (None, None) => {
            return Err(Error::Config("a query or --image is required".into()));
        }
    };

    let hits = match engine.search_documents(&query, args.count) {
        Ok(hits) => hits,
        Err(Error::EmptyResult) if !args.json => {
            println!("No results found.");
            return Ok(());
        }
        Err(Error::EmptyResult) => Vec::new(),
        Err(e) => return Err(e),
    };

    if args.json {
        let value = serde_json::json!({
            "query": label,
            "result_count": hits.len(),
            "results": hits,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if args.files {
        for hit in &hits {
            println!("{}", hit.path);
        }
    } else {
        format_human(&hits);
    }
    Ok(())
}

/// Format results for human-readable terminal output.
fn format_human(hits: &[SearchHit]) {
    for hit in hits {
        let name = Path::new(&hit.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| hit.filename.clone());
        println!("{:>3}. [{:.3}] {} #{}", hit.rank, hit.score, name, hit.doc_id);
        println!("     {}", hit.path);
    }
    println!("\n{} result(s)", hits.len());
}

fn cmd_config(config_db: &ConfigDb, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let settings = Settings::load(config_db)?;
            if !config_db::KNOWN_KEYS.contains(&key.as_str()) {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
            match config_db.get_setting(&key)? {
                Some(value) => println!("{value}"),
                None => println!("{}", default_display(&settings, &key)),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut settings = Settings::load(config_db)?;
            settings.apply(&key, &value)?;
            config_db.set_setting(&key, &value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            if !config_db::KNOWN_KEYS.contains(&key.as_str()) {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
            if config_db.remove_setting(&key)? {
                let settings = Settings::load(config_db)?;
                println!("{key} reset to default ({})", default_display(&settings, &key));
            } else {
                println!("{key} was not set");
            }
        }
        ConfigAction::List { json } => {
            let stored = config_db.list_settings()?;
            if json {
                let map: serde_json::Map<String, serde_json::Value> = stored
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                println!("{}", serde_json::Value::Object(map));
            } else if stored.is_empty() {
                println!("No settings stored; defaults apply.");
            } else {
                for (key, value) in stored {
                    println!("{key}\t{value}");
                }
            }
        }
    }
    Ok(())
}

/// The effective value of an unset key.
fn default_display(settings: &Settings, key: &str) -> String {
    match key {
        config_db::ROOT_KEY => String::new(),
        config_db::EXTENSIONS_KEY => settings.extensions.join(","),
        config_db::EXCLUDE_KEY => settings.exclude.join(","),
        config_db::OVER_FETCH_KEY => settings.over_fetch.to_string(),
        config_db::BALANCE_FACTOR_KEY => settings.balance_factor.to_string(),
        config_db::EMBEDDER_KEY => settings.embedder.to_string(),
        config_db::DIMENSION_KEY => settings.dimension.to_string(),
        _ => String::new(),
    }
}
