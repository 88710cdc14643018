//! Writers with a size ceiling, and documents declared up front

use cfbf_rs::{CfbError, Filesystem, Options};
use std::io::Write;

#[test]
fn test_limit_rejects_overflowing_write() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    {
        let mut root = fs.root();
        let mut writer = root
            .create_document("Header", b"")
            .unwrap()
            .into_writer(Some(512))
            .unwrap();

        writer.write_bytes(&[1u8; 500]).unwrap();
        assert!(matches!(
            writer.write_bytes(&[2u8; 13]),
            Err(CfbError::CapacityExceeded { limit: 512, attempted: 513 })
        ));
        writer.write_bytes(&[3u8; 12]).unwrap();
        assert_eq!(writer.written(), 512);
        writer.close().unwrap();
    }

    let data = fs.open_path("Header").unwrap().read_to_vec().unwrap();
    assert_eq!(data.len(), 512);
    assert!(data[500..].iter().all(|&b| b == 3));
}

#[test]
fn test_io_write_maps_capacity_error() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    let mut root = fs.root();
    let mut writer = root
        .create_document("Doc", b"")
        .unwrap()
        .into_writer(Some(4))
        .unwrap();

    let err = writer.write_all(b"too long").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn test_sized_document_spanning_stores() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    {
        let mut root = fs.root();
        root.create_document_sized("Mini", 100, |w| w.write_bytes(b"head"))
            .unwrap();
        root.create_document_sized("Main", 10_000, |w| {
            w.write_bytes(&[0x42; 6000])?;
            w.write_bytes(b"tail")
        })
        .unwrap();
    }

    let mini = fs.open_path("Mini").unwrap().read_to_vec().unwrap();
    assert_eq!(mini.len(), 100);
    assert_eq!(&mini[..4], b"head");
    assert!(mini[4..].iter().all(|&b| b == 0xFF));

    let main = fs.open_path("Main").unwrap().read_to_vec().unwrap();
    assert_eq!(main.len(), 10_000);
    assert_eq!(&main[6000..6004], b"tail");
    assert!(main[6004..].iter().all(|&b| b == 0xFF));
}

#[test]
fn test_sized_document_overflow_is_an_error() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    let mut root = fs.root();
    let result = root.create_document_sized("Doc", 8, |w| w.write_bytes(&[0u8; 9]));
    assert!(matches!(result, Err(CfbError::CapacityExceeded { .. })));
}

#[test]
fn test_failed_sized_document_leaves_no_entry() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    let free = fs.stats();
    {
        let mut root = fs.root();
        let result = root.create_document_sized("Doc", 8, |w| {
            w.write_bytes(&[1u8; 5])?;
            w.write_bytes(&[2u8; 4])
        });
        assert!(matches!(
            result,
            Err(CfbError::CapacityExceeded { limit: 8, attempted: 9 })
        ));
        assert!(!root.has_entry("Doc").unwrap());

        // The name is free for a retry
        root.create_document_sized("Doc", 8, |w| w.write_bytes(&[3u8; 8]))
            .unwrap();
        root.delete("Doc").unwrap();
    }
    assert_eq!(fs.stats().documents, free.documents);
    assert_eq!(fs.stats().free_main_blocks, free.free_main_blocks - 2);
    fs.verify().unwrap();
}

#[test]
fn test_failed_sized_document_discards_flushed_bytes() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    {
        let mut root = fs.root();
        let result = root.create_document_sized("Doc", 100, |w| {
            w.write_all(&[1u8; 60])?;
            w.flush()?;
            w.write_bytes(&[2u8; 60])
        });
        assert!(result.is_err());
        assert!(!root.has_entry("Doc").unwrap());
    }

    let stats = fs.stats();
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.free_mini_blocks % 128, 0);
    fs.verify().unwrap();
}

#[test]
fn test_failed_store_leaves_no_entry() {
    let temp = tempfile::NamedTempFile::new().unwrap();
    {
        let mut fs = Filesystem::create_file(temp.path(), Options::default()).unwrap();
        fs.root().create_document("Big", &[0u8; 5000]).unwrap();
        fs.close().unwrap();
    }

    let mut fs = Filesystem::open_read_only(temp.path()).unwrap();
    let mut root = fs.root();
    assert!(matches!(
        root.create_document("Small", b"data"),
        Err(CfbError::ReadOnly)
    ));
    assert!(!root.has_entry("Small").unwrap());
    assert_eq!(root.entry_names().unwrap(), ["Big"]);
}

#[test]
fn test_writer_flush_then_close() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    let mut root = fs.root();
    let mut doc = root.create_document("Doc", b"").unwrap();

    let mut writer = doc.writer(None).unwrap();
    writer.write_all(b"first").unwrap();
    writer.flush().unwrap();
    writer.close().unwrap();

    assert_eq!(doc.read_all().unwrap(), b"first");
}

#[test]
fn test_unlimited_writer_grows_past_cutoff() {
    let mut fs = Filesystem::create(Options::default()).unwrap();
    {
        let mut root = fs.root();
        let mut writer = root
            .create_document("Growing", b"")
            .unwrap()
            .into_writer(None)
            .unwrap();
        for chunk in 0..20u8 {
            writer.write_all(&[chunk; 1000]).unwrap();
        }
        writer.close().unwrap();
    }

    let fs = Filesystem::from_bytes(fs.into_bytes().unwrap()).unwrap();
    let data = fs.open_path("Growing").unwrap().read_to_vec().unwrap();
    assert_eq!(data.len(), 20_000);
    assert_eq!(data[19_999], 19);
    fs.verify().unwrap();
}
