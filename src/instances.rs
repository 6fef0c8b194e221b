//! Benchmark instance manifest: one `model,property,timeout` row per property
use crate::error::{PropGenError, Result};
use crate::vnnlib::property_index;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance {
    pub model: PathBuf,
    pub property: PathBuf,
    pub timeout_secs: u64,
}

impl Instance {
    pub fn new(model: impl Into<PathBuf>, property: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            model: model.into(),
            property: property.into(),
            timeout_secs,
        }
    }
}

fn escape_field(field: &str) -> String {
    if field.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Path of `path` relative to `root`, or `path` itself when it lies elsewhere.
pub fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map_or_else(|_| path.to_path_buf(), Path::to_path_buf)
}

/// # Errors
/// If writing to `w` fails
pub fn write_instances<W: Write>(w: &mut W, instances: &[Instance]) -> io::Result<()> {
    for instance in instances {
        writeln!(
            w,
            "{},{},{}",
            escape_field(&instance.model.to_string_lossy()),
            escape_field(&instance.property.to_string_lossy()),
            instance.timeout_secs
        )?;
    }
    Ok(())
}

/// # Errors
/// If the file cannot be written
pub fn write_instances_file(path: &Path, instances: &[Instance]) -> Result<()> {
    let file = File::create(path).map_err(|err| PropGenError::io(path, err))?;
    let mut writer = BufWriter::new(file);
    write_instances(&mut writer, instances)
        .and_then(|_| writer.flush())
        .map_err(|err| PropGenError::io(path, err))
}

/// Property files in `dir`, ordered by the index in their file name.
///
/// # Errors
/// If the directory cannot be listed
pub fn collect_properties(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| PropGenError::io(dir, err))? {
        let path = entry.map_err(|err| PropGenError::io(dir, err))?.path();
        let is_property = path.extension().map_or(false, |ext| ext == "vnnlib");
        if !is_property {
            continue;
        }
        let index = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(property_index)
            .unwrap_or(usize::MAX);
        found.push((index, path));
    }
    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}
