use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Write a file stamped an hour in the past, so anything the store stamps
/// on upload is strictly newer.
pub(crate) fn write_old(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    let f = fs::File::options().write(true).open(path).unwrap();
    f.set_modified(SystemTime::now() - Duration::from_secs(3600)).unwrap();
}
