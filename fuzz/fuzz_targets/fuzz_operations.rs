#![no_main]
use arbitrary::Arbitrary;
use cfbf_rs::CompoundFile;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Operation {
    Write { slot: u8, len: u16, fill: u8 },
    Delete { slot: u8 },
    Mkdir { slot: u8 },
    Flush,
}

fn path(slot: u8) -> String {
    format!("D{}/S{}", slot % 4, slot % 16)
}

fuzz_target!(|ops: Vec<Operation>| {
    let mut file = CompoundFile::create().unwrap();

    for op in ops.into_iter().take(64) {
        match op {
            Operation::Write { slot, len, fill } => {
                let _ = file.write(path(slot), &vec![fill; len as usize]);
            }
            Operation::Delete { slot } => {
                let _ = file.delete(path(slot));
            }
            Operation::Mkdir { slot } => {
                let _ = file.create_dir(format!("D{}", slot % 4));
            }
            Operation::Flush => file.flush().unwrap(),
        }
    }

    file.verify().unwrap();
    let file = CompoundFile::from_bytes(file.into_bytes().unwrap()).unwrap();
    file.verify().unwrap();
});
