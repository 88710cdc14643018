//! Freed blocks are handed out again before the container grows

use cfbf_rs::{CompoundFile, Filesystem, Options};

#[test]
fn test_deleted_main_blocks_are_reused() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    fs.root().create_document("First", &[1u8; 20_000]).unwrap();
    let blocks = fs.stats().main_blocks;

    fs.root().delete("First").unwrap();
    fs.root().create_document("Second", &[2u8; 20_000]).unwrap();

    assert_eq!(fs.stats().main_blocks, blocks);
    fs.verify().unwrap();
}

#[test]
fn test_deleted_mini_blocks_are_reused() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    fs.root().create_document("A", &[1u8; 1000]).unwrap();
    fs.root().create_document("B", &[2u8; 1000]).unwrap();
    let stats = fs.stats();

    fs.root().delete("A").unwrap();
    assert_eq!(fs.stats().free_mini_blocks, stats.free_mini_blocks + 16);

    fs.root().create_document("C", &[3u8; 1000]).unwrap();
    assert_eq!(fs.stats(), stats);

    assert_eq!(fs.open_path("B").unwrap().read_to_vec().unwrap(), vec![2u8; 1000]);
    assert_eq!(fs.open_path("C").unwrap().read_to_vec().unwrap(), vec![3u8; 1000]);
}

#[test]
fn test_shrinking_overwrite_releases_tail() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    fs.root().create_document("Doc", &[1u8; 20_000]).unwrap();
    let free = fs.stats().free_main_blocks;

    fs.root()
        .document("Doc")
        .unwrap()
        .replace(&[2u8; 5000])
        .unwrap();

    // 40 blocks down to 10
    assert_eq!(fs.stats().free_main_blocks, free + 30);
    fs.verify().unwrap();
}

#[test]
fn test_growing_overwrite_keeps_existing_blocks() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    fs.root().create_document("Doc", &[1u8; 5000]).unwrap();
    let id = fs.resolve("Doc").unwrap();
    let start = fs.properties().property(id).unwrap().start_block;

    fs.root()
        .document("Doc")
        .unwrap()
        .replace(&[2u8; 9000])
        .unwrap();

    assert_eq!(fs.properties().property(id).unwrap().start_block, start);
    assert_eq!(fs.open_path("Doc").unwrap().read_to_vec().unwrap(), vec![2u8; 9000]);
}

#[test]
fn test_file_does_not_grow_across_rewrites() {
    let mut file = CompoundFile::create().unwrap();
    file.write("Stream", &[0u8; 30_000]).unwrap();
    file.write("Small", &[0u8; 300]).unwrap();
    file.flush().unwrap();
    let size = file.stats().main_blocks;

    for round in 0..10u8 {
        file.write("Stream", &vec![round; 30_000]).unwrap();
        file.write("Small", &vec![round; 300]).unwrap();
        file.flush().unwrap();
        assert_eq!(file.stats().main_blocks, size);
    }

    let file = CompoundFile::from_bytes(file.into_bytes().unwrap()).unwrap();
    assert_eq!(file.read("Stream").unwrap(), vec![9u8; 30_000]);
    assert_eq!(file.read("Small").unwrap(), vec![9u8; 300]);
}

#[test]
fn test_empty_mini_stream_is_reused_after_reopen() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    fs.root().create_document("A", &[1u8; 100]).unwrap();
    let mut fs = Filesystem::from_bytes(fs.into_bytes().unwrap()).unwrap();
    let blocks = fs.stats().main_blocks;

    for round in 0..6u8 {
        let name = format!("S{}", round);
        let previous = if round == 0 { "A".to_string() } else { format!("S{}", round - 1) };

        fs.root().delete(&previous).unwrap();
        let bytes = fs.into_bytes().unwrap();
        let reopened = Filesystem::from_bytes(bytes).unwrap();
        assert_eq!(reopened.properties().property(0).unwrap().start_block, 0xFFFF_FFFE);
        assert_eq!(reopened.stats().mini_blocks, 0);

        fs = reopened;
        fs.root().create_document(&name, &[round; 100]).unwrap();
        fs = Filesystem::from_bytes(fs.into_bytes().unwrap()).unwrap();

        assert_eq!(fs.stats().main_blocks, blocks);
        assert_eq!(fs.open_path(&name).unwrap().read_to_vec().unwrap(), vec![round; 100]);
        fs.verify().unwrap();
    }
}
