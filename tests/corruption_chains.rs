//! Corruption tests for allocation chains
//!
//! Damaged files must fail with an error instead of looping or panicking

use cfbf_rs::{CfbError, Filesystem, Options};

const BLOCK: usize = 512;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn block_offset(index: u32) -> usize {
    (index as usize + 1) * BLOCK
}

/// Offset of the entry for `index` in a table that starts at `table_block`
fn entry_offset(table_block: u32, index: u32) -> usize {
    block_offset(table_block) + index as usize * 4
}

fn first_bat(bytes: &[u8]) -> u32 {
    read_u32(bytes, 0x4C)
}

/// Container with one main-store and one mini-store document
fn sample() -> (Vec<u8>, u32, u32) {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    fs.root().create_document("Big", &[1u8; 5000]).unwrap();
    fs.root().create_document("Small", &[2u8; 500]).unwrap();

    let big = fs.resolve("Big").unwrap();
    let small = fs.resolve("Small").unwrap();
    let big_start = fs.properties().property(big).unwrap().start_block;
    let small_start = fs.properties().property(small).unwrap().start_block;

    (fs.into_bytes().unwrap(), big_start, small_start)
}

#[test]
fn test_main_chain_loop_detected_on_read() {
    let (mut bytes, big_start, _) = sample();
    let bat = first_bat(&bytes);

    // Point the second block of "Big" back at its first
    let second = read_u32(&bytes, entry_offset(bat, big_start));
    write_u32(&mut bytes, entry_offset(bat, second), big_start);

    let fs = Filesystem::from_bytes(bytes).unwrap();
    assert!(matches!(
        fs.open_path("Big"),
        Err(CfbError::ChainLoop { .. })
    ));
    assert!(fs.verify().is_err());

    // Unaffected documents still read
    assert_eq!(
        fs.open_path("Small").unwrap().read_to_vec().unwrap(),
        vec![2u8; 500]
    );
}

#[test]
fn test_mini_chain_loop_detected_on_read() {
    let (mut bytes, _, small_start) = sample();
    let sbat = read_u32(&bytes, 0x3C);

    let second = read_u32(&bytes, entry_offset(sbat, small_start));
    write_u32(&mut bytes, entry_offset(sbat, second), small_start);

    let fs = Filesystem::from_bytes(bytes).unwrap();
    assert!(matches!(
        fs.open_path("Small"),
        Err(CfbError::ChainLoop { .. })
    ));
}

#[test]
fn test_property_chain_loop_fails_open() {
    let (mut bytes, _, _) = sample();
    let bat = first_bat(&bytes);
    let start = read_u32(&bytes, 0x30);

    write_u32(&mut bytes, entry_offset(bat, start), start);

    assert!(matches!(
        Filesystem::from_bytes(bytes),
        Err(CfbError::ChainLoop { .. })
    ));
}

#[test]
fn test_reserved_value_in_chain() {
    let (mut bytes, big_start, _) = sample();
    let bat = first_bat(&bytes);

    write_u32(&mut bytes, entry_offset(bat, big_start), 0xFFFF_FFFD);

    let fs = Filesystem::from_bytes(bytes).unwrap();
    assert!(matches!(
        fs.open_path("Big"),
        Err(CfbError::CorruptChain { .. })
    ));
}

#[test]
fn test_truncated_chain_reports_short_chain() {
    let (mut bytes, big_start, _) = sample();
    let bat = first_bat(&bytes);

    // End "Big" after its first block
    write_u32(&mut bytes, entry_offset(bat, big_start), 0xFFFF_FFFE);

    let fs = Filesystem::from_bytes(bytes).unwrap();
    assert!(matches!(
        fs.open_path("Big"),
        Err(CfbError::ShortChain { expected: 10, actual: 1, .. })
    ));
}

#[test]
fn test_verify_on_open_option() {
    let (mut bytes, big_start, _) = sample();
    let bat = first_bat(&bytes);
    let second = read_u32(&bytes, entry_offset(bat, big_start));
    write_u32(&mut bytes, entry_offset(bat, second), big_start);

    // Lazy open succeeds, eager verification does not
    assert!(Filesystem::from_bytes(bytes.clone()).is_ok());

    let options = Options {
        verify_chains_on_open: true,
        ..Options::default()
    };
    assert!(Filesystem::from_bytes_with(bytes, options).is_err());
}

#[test]
fn test_truncated_file() {
    let (bytes, _, _) = sample();
    assert!(Filesystem::from_bytes(bytes[..BLOCK + BLOCK / 2].to_vec()).is_err());
    assert!(Filesystem::from_bytes(bytes[..100].to_vec()).is_err());
    assert!(Filesystem::from_bytes(Vec::new()).is_err());
}

#[test]
fn test_bad_signature_and_block_size() {
    let (bytes, _, _) = sample();

    let mut bad_signature = bytes.clone();
    bad_signature[0] = 0;
    assert!(matches!(
        Filesystem::from_bytes(bad_signature),
        Err(CfbError::InvalidSignature)
    ));

    let mut bad_shift = bytes;
    bad_shift[0x1E] = 10;
    assert!(matches!(
        Filesystem::from_bytes(bad_shift),
        Err(CfbError::InvalidBlockSize(10))
    ));
}

#[test]
fn test_random_damage_never_panics() {
    use rand::{Rng, SeedableRng};

    let (bytes, _, _) = sample();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x01E2);

    for _ in 0..200 {
        let mut damaged = bytes.clone();
        for _ in 0..rng.gen_range(1..16) {
            let offset = rng.gen_range(0..damaged.len());
            damaged[offset] = rng.gen();
        }

        if let Ok(fs) = Filesystem::from_bytes(damaged) {
            let _ = fs.verify();
            for path in ["Big", "Small"] {
                if let Ok(mut reader) = fs.open_path(path) {
                    let _ = reader.read_to_vec();
                }
            }
        }
    }
}
