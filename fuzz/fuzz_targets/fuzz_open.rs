#![no_main]
use cfbf_rs::CompoundFile;
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes must open, walk and read without panicking or hanging
fuzz_target!(|data: &[u8]| {
    let file = match CompoundFile::from_bytes(data.to_vec()) {
        Ok(file) => file,
        Err(_) => return,
    };

    let _ = file.verify();
    if let Ok(entries) = file.list_entries("") {
        for entry in entries.iter().filter(|e| !e.is_dir) {
            let _ = file.read(&entry.path);
        }
    }
});
