use packvault::archive::{pack, unpack, PackOptions, UnpackOptions};
use std::fs;
fn main() {
    let source = tempfile::tempdir().unwrap();
    let root = source.path().join("a");
    fs::create_dir_all(&root).unwrap();
    nix::unistd::mkfifo(&root.join("pipe"), nix::sys::stat::Mode::from_bits_truncate(0o600)).unwrap();
    eprintln!("mkfifo done");
    let work = tempfile::tempdir().unwrap();
    let archive_path = work.path().join("a.pvk");
    eprintln!("about to pack");
    pack(&root, &archive_path, &PackOptions::default(), &|_| true).unwrap();
    eprintln!("pack done");
    let restore = tempfile::tempdir().unwrap();
    let options = UnpackOptions { restore_metadata: true, ..Default::default() };
    unpack(&archive_path, restore.path(), &options).unwrap();
    eprintln!("unpack done");
}
