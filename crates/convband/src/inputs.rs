//! Input discovery and output naming.

use convband_core::ExecutionContext;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 2] = ["ppm", "pgm"];

/// Where inputs come from, decided by what `input` points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputSet {
    /// A single file; the output is named after the execution mode.
    File(PathBuf),
    /// Every `*.ppm` / `*.pgm` in a directory, sorted by file name.
    Directory(Vec<PathBuf>),
}

impl InputSet {
    /// Resolve `input` into one or more image paths.
    pub fn discover(input: impl AsRef<Path>) -> io::Result<Self> {
        let input = input.as_ref();
        let meta = fs::metadata(input)?;
        if !meta.is_dir() {
            return Ok(Self::File(input.to_path_buf()));
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(input)? {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(Self::Directory(files))
    }

    pub fn paths(&self) -> &[PathBuf] {
        match self {
            Self::File(path) => std::slice::from_ref(path),
            Self::Directory(paths) => paths,
        }
    }

    pub fn len(&self) -> usize {
        self.paths().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths().is_empty()
    }

    /// Output path for input `index` under `output_dir`.
    ///
    /// Directory inputs keep their file name behind an `output_` prefix; a
    /// single input is written as `output_<tag>.ppm`, tagged by `ctx`.
    pub fn output_path(&self, index: usize, output_dir: &Path, ctx: &ExecutionContext) -> PathBuf {
        match self {
            Self::File(_) => output_dir.join(format!("output_{}.ppm", ctx.tag())),
            Self::Directory(paths) => {
                let name = paths
                    .get(index)
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{index}.ppm"));
                output_dir.join(format!("output_{name}"))
            }
        }
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}
