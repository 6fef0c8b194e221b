//! VNN-LIB robustness properties.
//!
//! A property asserts the input box and the negated robustness condition: some
//! class other than the true label scores at least as high as the true label.
//! A verifier proving the property unsatisfiable proves the box robust.
use crate::bounds::Bounds1;
use crate::error::{PropGenError, Result};
use crate::filter::PropertySink;
use crate::NNVFloat;
use log::debug;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// # Errors
/// If writing to `w` fails
pub fn write_property<W: Write>(
    w: &mut W,
    bounds: &Bounds1,
    label: usize,
    num_classes: usize,
    title: &str,
) -> io::Result<()> {
    writeln!(w, "; {} property with label: {}.", title, label)?;

    writeln!(w)?;
    for i in 0..bounds.ndim() {
        writeln!(w, "(declare-const X_{} Real)", i)?;
    }
    writeln!(w)?;

    writeln!(w)?;
    for i in 0..num_classes {
        writeln!(w, "(declare-const Y_{} Real)", i)?;
    }
    writeln!(w)?;

    writeln!(w, "; Input constraints:")?;
    for (i, (lower, upper)) in bounds.features().enumerate() {
        writeln!(w, "(assert (<= X_{} {}))", i, upper)?;
        writeln!(w, "(assert (>= X_{} {}))", i, lower)?;
        writeln!(w)?;
    }
    writeln!(w)?;

    writeln!(w, "; Output constraints:")?;
    writeln!(w, "(assert (or")?;
    for i in (0..num_classes).filter(|&i| i != label) {
        writeln!(w, "    (and (>= Y_{} Y_{}))", i, label)?;
    }
    writeln!(w, "))")
}

pub fn property_file_name(index: usize, epsilon: NNVFloat) -> String {
    format!("prop_{}_eps_{:.3}.vnnlib", index, epsilon)
}

/// Index encoded in a file named by [`property_file_name`].
pub fn property_index(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix("prop_")?
        .split('_')
        .next()?
        .parse()
        .ok()
}

/// Writes every accepted property as its own file in one directory.
#[derive(Debug)]
pub struct VnnlibDirectory {
    dir: PathBuf,
    epsilon: NNVFloat,
    num_classes: usize,
    title: String,
    written: Vec<PathBuf>,
}

impl VnnlibDirectory {
    /// # Errors
    /// If the directory cannot be created
    pub fn create(dir: &Path, epsilon: NNVFloat, num_classes: usize, title: &str) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|err| PropGenError::io(dir, err))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            epsilon,
            num_classes,
            title: title.to_string(),
            written: Vec::new(),
        })
    }

    /// Paths of the files written so far, in emission order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn into_written(self) -> Vec<PathBuf> {
        self.written
    }
}

impl PropertySink for VnnlibDirectory {
    fn emit(
        &mut self,
        index: usize,
        sample: usize,
        bounds: &Bounds1,
        label: usize,
        runner_up: Option<usize>,
    ) -> Result<()> {
        if label >= self.num_classes {
            return Err(PropGenError::LabelOutOfRange {
                label,
                num_classes: self.num_classes,
            });
        }
        let path = self.dir.join(property_file_name(index, self.epsilon));
        let file = File::create(&path).map_err(|err| PropGenError::io(&path, err))?;
        let mut writer = BufWriter::new(file);
        write_property(&mut writer, bounds, label, self.num_classes, &self.title)
            .and_then(|_| writer.flush())
            .map_err(|err| PropGenError::io(&path, err))?;
        debug!(
            "wrote {} for sample {} (label {}, runner-up {:?})",
            path.display(),
            sample,
            label,
            runner_up
        );
        self.written.push(path);
        Ok(())
    }
}
