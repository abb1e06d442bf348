//! File I/O helpers (gzip aware)

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

fn is_gzip(p: &Path) -> bool {
    p.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .eq_ignore_ascii_case("gz")
}

/// Opens `path` for line reading; `.gz` files are decompressed on the fly.
pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    let f = File::open(p)?;
    if is_gzip(p) {
        let dec = flate2::read::GzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

/// Writer wrapper to propagate finish/close errors for compressed outputs.
#[must_use = "call .close() to propagate compression/IO errors"]
pub enum Writer {
    Plain(BufWriter<File>),
    Gz(flate2::write::GzEncoder<File>),
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Writer::Plain(f) => f.write(buf),
            Writer::Gz(e) => e.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => f.flush(),
            Writer::Gz(e) => e.flush(),
        }
    }
}

impl Writer {
    /// Finalize the stream and flush the underlying file.
    pub fn close(self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => {
                let mut file = f.into_inner().map_err(|e| e.into_error())?;
                file.flush()
            }
            Writer::Gz(e) => {
                let mut f = e.finish()?;
                f.flush()
            }
        }
    }
}

/// Creates `path`, gzip-compressing when it ends in `.gz`.
pub fn open_writer<P: AsRef<Path>>(path: P) -> io::Result<Writer> {
    let p = path.as_ref();
    let f = File::create(p)?;
    if is_gzip(p) {
        let enc = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        return Ok(Writer::Gz(enc));
    }
    Ok(Writer::Plain(BufWriter::new(f)))
}

/// Writes `value` as pretty-printed JSON.
pub fn write_json<P: AsRef<Path>, T: Serialize + ?Sized>(path: P, value: &T) -> io::Result<()> {
    let mut w = open_writer(path)?;
    serde_json::to_writer_pretty(&mut w, value)?;
    writeln!(w)?;
    w.close()
}

/// Reads a JSON document (plain or gzip-compressed).
pub fn read_json<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> io::Result<T> {
    let reader = open_reader(path)?;
    Ok(serde_json::from_reader(reader)?)
}

/// `.jsonl` / `.jsonl.gz` files directly inside `dir`, in sorted order,
/// truncated to `limit` files.
pub fn list_data_files<P: AsRef<Path>>(dir: P, limit: Option<usize>) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if path.is_file() && (name.ends_with(".jsonl") || name.ends_with(".jsonl.gz")) {
            files.push(path);
        }
    }
    files.sort();
    if let Some(limit) = limit {
        files.truncate(limit);
    }
    Ok(files)
}
