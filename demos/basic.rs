//! Basic compound file usage
//!
//! Demonstrates the core functionality:
//! - Creating a container in memory
//! - Writing and reading streams by path
//! - Listing storages and inspecting metadata
//! - Saving to disk and reopening
//!
//! Run with: cargo run --example basic

use cfbf_rs::{CompoundFile, CompoundFileBuilder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Compound File Basic Usage ===\n");

    let dir = std::env::temp_dir();
    let path = dir.join("cfbf-basic-demo.cfb");

    println!("1. Creating container at {}...", path.display());
    let mut file = CompoundFileBuilder::new().path(&path).block_size(512).build()?;
    println!();

    println!("2. Writing streams...");
    file.write("WordDocument", &vec![0u8; 10 * 1024])?;
    file.write("\u{5}SummaryInformation", &[0xFE, 0xFF, 0x00, 0x00])?;
    file.write("ObjectPool/_1/Contents", b"embedded object payload")?;
    println!("   Written 3 streams (one large, two in the mini store)");
    println!();

    println!("3. Reading 'ObjectPool/_1/Contents'...");
    let content = file.read("ObjectPool/_1/Contents")?;
    println!("   Content: {}", String::from_utf8_lossy(&content));
    println!();

    println!("4. Listing the root storage...");
    for name in file.list("/")? {
        println!("   - {:?}", name);
    }
    println!();

    println!("5. Updating a stream...");
    file.write("ObjectPool/_1/Contents", b"a longer replacement payload")?;
    let meta = file.metadata("ObjectPool/_1/Contents")?;
    println!("   New size: {} bytes", meta.size);
    println!();

    println!("6. Allocation statistics...");
    let stats = file.stats();
    println!("   Block size:      {} bytes", stats.block_size);
    println!("   Main blocks:     {} ({} free)", stats.main_blocks, stats.free_main_blocks);
    println!("   Mini blocks:     {} ({} free)", stats.mini_blocks, stats.free_mini_blocks);
    println!("   Entries:         {}", stats.properties);
    println!();

    println!("7. Closing and reopening...");
    file.close()?;
    let file = CompoundFile::open_read_only(&path)?;
    file.verify()?;
    println!("   Reopened, {} entries below the root", file.list_entries("/")?.len());

    std::fs::remove_file(&path).ok();
    println!("\n=== Done ===");
    Ok(())
}
