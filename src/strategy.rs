//! Strategy run staging.
//!
//! Before CAP can execute a strategy, a run file is produced from a template:
//! its first 512 bytes are replaced by a header holding the output base name
//! and the output path, each in a fixed 256-byte NUL-padded field, and the
//! rest of the template is copied unchanged. The companion parameter file is
//! copied byte for byte. CAP reads the header fields by offset, so the layout
//! must stay exact.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{CapError, CapResult};

/// Width of one header field in bytes.
pub const FIELD_LEN: usize = 256;
/// Total header length; template bytes before this offset are replaced.
pub const HEADER_LEN: usize = 2 * FIELD_LEN;

/// The two fixed-width fields at the start of a strategy run file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyHeader {
    pub base_name: String,
    pub output_path: String,
}

impl StrategyHeader {
    pub fn new(base_name: impl Into<String>, output_path: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            output_path: output_path.into(),
        }
    }

    /// Encode into exactly [`HEADER_LEN`] bytes.
    pub fn encode(&self) -> CapResult<[u8; HEADER_LEN]> {
        let mut header = [0u8; HEADER_LEN];
        put_field(&mut header[..FIELD_LEN], "base_name", &self.base_name)?;
        put_field(&mut header[FIELD_LEN..], "output_path", &self.output_path)?;
        Ok(header)
    }

    /// Decode the header at the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            base_name: get_field(&bytes[..FIELD_LEN]),
            output_path: get_field(&bytes[FIELD_LEN..HEADER_LEN]),
        })
    }
}

fn put_field(slot: &mut [u8], field: &'static str, value: &str) -> CapResult<()> {
    let bytes = value.as_bytes();
    if bytes.len() > FIELD_LEN {
        return Err(CapError::StrategyField {
            field,
            len: bytes.len(),
            max: FIELD_LEN,
        });
    }
    slot[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn get_field(slot: &[u8]) -> String {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).into_owned()
}

/// Files written by [`stage_strategy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedStrategy {
    pub run_file: PathBuf,
    pub parameter_file: PathBuf,
}

/// Write `<dest_dir>/<run_name>.run` from `template` with `header` and copy
/// `parameters` next to it as `<run_name>.<parameters extension>`.
pub fn stage_strategy(
    template: &Path,
    parameters: &Path,
    dest_dir: &Path,
    run_name: &str,
    header: &StrategyHeader,
) -> CapResult<StagedStrategy> {
    let encoded = header.encode()?;

    let template_bytes = fs::read(template)?;
    if template_bytes.len() < HEADER_LEN {
        return Err(CapError::TemplateTooShort {
            path: template.to_path_buf(),
            len: template_bytes.len(),
        });
    }

    fs::create_dir_all(dest_dir)?;

    let run_file = dest_dir.join(format!("{}.run", run_name));
    let parameter_file = match parameters.extension() {
        Some(ext) => dest_dir.join(format!("{}.{}", run_name, ext.to_string_lossy())),
        None => dest_dir.join(run_name),
    };
    if parameter_file == run_file {
        return Err(CapError::InvalidParameter(format!(
            "parameter file {} would overwrite the run file",
            parameters.display()
        )));
    }
    // Copying a file onto itself truncates it
    if same_file(parameters, &parameter_file)? {
        return Err(CapError::InvalidParameter(format!(
            "parameter file {} is already the staged destination",
            parameters.display()
        )));
    }

    let mut contents = Vec::with_capacity(template_bytes.len());
    contents.extend_from_slice(&encoded);
    contents.extend_from_slice(&template_bytes[HEADER_LEN..]);
    fs::write(&run_file, &contents)?;

    fs::copy(parameters, &parameter_file)?;

    info!(
        "Staged strategy {} ({} bytes) with parameters {}",
        run_file.display(),
        contents.len(),
        parameter_file.display()
    );
    Ok(StagedStrategy {
        run_file,
        parameter_file,
    })
}

fn same_file(source: &Path, destination: &Path) -> CapResult<bool> {
    if !destination.exists() {
        return Ok(false);
    }
    Ok(fs::canonicalize(source)? == fs::canonicalize(destination)?)
}
