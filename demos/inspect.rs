//! Dump the tree of an existing compound file
//!
//! Run with: cargo run --example inspect -- path/to/file.doc

use cfbf_rs::{CompoundFile, PropertyKind};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: inspect <compound file>");
            std::process::exit(2);
        }
    };

    let file = CompoundFile::open_read_only(&path)?;
    let stats = file.stats();
    println!(
        "{}: {} byte blocks, {} entries, {} documents",
        path, stats.block_size, stats.properties, stats.documents
    );

    // Path order puts every storage right before its contents
    let mut entries = file.list_entries("/")?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    for entry in entries {
        let depth = entry.path.matches('/').count();
        let marker = match entry.kind {
            PropertyKind::Document => ' ',
            _ => '+',
        };
        println!(
            "{}{} {:?} {}",
            "  ".repeat(depth),
            marker,
            entry.name,
            entry.size.map(|s| format!("({} bytes)", s)).unwrap_or_default()
        );
    }

    match file.verify() {
        Ok(()) => println!("\nAll chains verified"),
        Err(e) => println!("\nVerification failed: {}", e),
    }

    Ok(())
}
