use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Ahead-of-time compiled Android artifacts; ELF on disk but not native code we audit.
const SKIPPED_MARKERS: [&str; 2] = [".oat", ".odex"];

/// True if `path` is a regular file starting with the ELF magic.
pub fn is_elf_file(path: &Path) -> io::Result<bool> {
    let mut magic = [0u8; 4];
    let mut file = fs::File::open(path)?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == ELF_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn skipped_name(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    SKIPPED_MARKERS.iter().any(|m| name.contains(m))
}

/// Recursively collect ELF files under an already-mounted tree, sorted.
///
/// Symlinks are not followed. Unreadable entries are logged and skipped; only
/// failure to read `root` itself is an error.
pub fn find_elf_binaries(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(io::Error::from(e)),
            Err(e) => {
                warn!("skipping unreadable entry under {}: {e}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() || skipped_name(entry.path()) {
            continue;
        }
        match is_elf_file(entry.path()) {
            Ok(true) => found.push(entry.into_path()),
            Ok(false) => {}
            Err(e) => debug!("could not read {}: {e}", entry.path().display()),
        }
    }
    found.sort();
    Ok(found)
}
