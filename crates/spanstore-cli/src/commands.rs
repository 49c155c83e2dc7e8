use anyhow::Context;
use colored::Colorize;
use serde::Serialize;
use spanstore_core::{FileMedium, Location, ObjectStore, StoreConfig};

use crate::cli::*;

type Store = ObjectStore<FileMedium>;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    let medium = FileMedium::open(&cli.store)
        .with_context(|| format!("opening {}", cli.store.display()))?;
    let mut store = ObjectStore::open_with_config(medium, config)
        .with_context(|| format!("reading store {}", cli.store.display()))?;
    let format = cli.format;

    match cli.command {
        Command::Info(_) => cmd_info(&store, &format),
        Command::Ids(args) => cmd_ids(&store, args, &format),
        Command::Get(args) => cmd_get(&store, args, &format),
        Command::Put(args) => cmd_put(&mut store, args),
        Command::Delete(args) => cmd_delete(&mut store, args),
        Command::Locate(args) => cmd_locate(&store, args, &format),
        Command::Search(args) => cmd_search(&store, args, &format),
        Command::Pack(_) => cmd_pack(&mut store, &format),
        Command::Verify(_) => cmd_verify(&store),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_info(store: &Store, format: &OutputFormat) -> anyhow::Result<()> {
    let report = store.report()?;
    if let OutputFormat::Json = format {
        return print_json(&report);
    }
    println!("Records: {}", report.records.to_string().bold());
    match report.max_id {
        Some(id) => println!("Max id: {}", id.to_string().yellow()),
        None => println!("Max id: {}", "none".dimmed()),
    }
    println!(
        "Index block: {} (slot {:?})",
        report.index_block.to_string().cyan(),
        report.active_slot
    );
    println!(
        "Medium: {} bytes, high-water mark {}",
        report.medium_len,
        report.alloc.high_water_mark
    );
    println!(
        "Space: {} used, {} free in {} spans ({:.1}% fragmented)",
        report.alloc.used_bytes,
        report.alloc.free_bytes,
        report.alloc.span_count,
        report.alloc.fragmentation() * 100.0
    );
    for t in &report.types {
        println!("  {} {}", t.type_hash.to_string().cyan(), t.count);
    }
    Ok(())
}

fn cmd_ids(store: &Store, args: IdsArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let ids = match args.kind.resolve()? {
        Some(hash) => store.ids_of_type(hash),
        None => store.ids(),
    };
    if let OutputFormat::Json = format {
        return print_json(&ids);
    }
    for id in ids {
        let kind = store.type_of(id).map(|h| h.to_string()).unwrap_or_default();
        println!("{} {}", id.to_string().yellow(), kind.dimmed());
    }
    Ok(())
}

fn cmd_get(store: &Store, args: GetArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let payload = store.load(args.id, args.kind.require()?)?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "id": args.id,
            "len": payload.len(),
            "hex": hex::encode(&payload),
        })),
        OutputFormat::Text if args.hex => {
            println!("{}", hex::encode(&payload));
            Ok(())
        }
        OutputFormat::Text => {
            println!("{}", String::from_utf8_lossy(&payload));
            Ok(())
        }
    }
}

fn cmd_put(store: &mut Store, args: PutArgs) -> anyhow::Result<()> {
    let hash = args.kind.require()?;
    store.store(args.id, hash, args.value.as_bytes())?;
    store.commit()?;
    println!(
        "{} Stored {} ({} bytes, type {})",
        "✓".green().bold(),
        args.id.to_string().yellow(),
        args.value.len(),
        hash.to_string().cyan()
    );
    Ok(())
}

fn cmd_delete(store: &mut Store, args: DeleteArgs) -> anyhow::Result<()> {
    if !store.delete(args.id)? {
        println!("No record {}", args.id.to_string().yellow());
        return Ok(());
    }
    store.commit()?;
    println!("{} Deleted {}", "✓".green().bold(), args.id.to_string().yellow());
    Ok(())
}

fn describe(location: &Location) -> String {
    format!(
        "record {} (type {}, {} bytes at {}, {})",
        location.id.to_string().yellow(),
        location.type_hash.to_string().cyan(),
        location.record_len,
        location.record_start,
        location.state
    )
}

fn cmd_locate(store: &Store, args: LocateArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let location = store.locate(args.offset)?;
    if let OutputFormat::Json = format {
        return print_json(&location);
    }
    match location {
        Some(location) => println!("{}: {}", args.offset, describe(&location)),
        None => println!("{}: {}", args.offset, "no record".dimmed()),
    }
    Ok(())
}

#[derive(Serialize)]
struct SearchHit {
    offset: u64,
    location: Option<Location>,
}

fn cmd_search(store: &Store, args: SearchArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let pattern = args.pattern()?;
    let hits = store
        .find_bytes(&pattern)?
        .into_iter()
        .map(|offset| {
            Ok(SearchHit {
                offset,
                location: store.locate(offset)?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if let OutputFormat::Json = format {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("No matches.");
    }
    for hit in &hits {
        match &hit.location {
            Some(location) => println!("{}: {}", hit.offset, describe(location)),
            None => println!("{}: {}", hit.offset, "unowned".dimmed()),
        }
    }
    Ok(())
}

fn cmd_pack(store: &mut Store, format: &OutputFormat) -> anyhow::Result<()> {
    let report = store.commit_and_pack()?;
    if let OutputFormat::Json = format {
        return print_json(&report);
    }
    println!(
        "{} Packed: {} -> {} bytes, {} records moved",
        "✓".green().bold(),
        report.bytes_before,
        report.bytes_after.to_string().bold(),
        report.relocated
    );
    Ok(())
}

fn cmd_verify(store: &Store) -> anyhow::Result<()> {
    store.verify()?;
    println!("{} Store verified", "✓".green().bold());
    println!("  Records: {}", store.len().to_string().bold());
    println!("  Index block: {}", "consistent".green());
    Ok(())
}
