//! CAP command vocabulary.
//!
//! Each [`CapCommand`] turns into the text CAP expects plus the time it is
//! given to answer. Command roots come from the configuration's
//! [`CommandTable`](crate::config::CommandTable); the argument layout is fixed
//! by CAP and must not change.

use std::fmt;
use std::path::{PathBuf, MAIN_SEPARATOR};
use std::str::FromStr;

use crate::command::Command;
use crate::config::CapConfig;
use crate::error::{CapError, CapResult};

/// Extra time granted on top of the nominal acquisition time.
pub const ACQUISITION_MARGIN_SECS: u64 = 60;

/// Translation axis of the XtalCheck stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl FromStr for Axis {
    type Err = CapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(CapError::InvalidAxis(other.to_string())),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        })
    }
}

/// Omega scan parameters shared by the short and full scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanParams {
    pub folder: String,
    pub base_name: String,
    /// Exposure per frame in seconds
    pub exposure_s: f64,
    /// Frame width in degrees
    pub width: f64,
    /// Scan range in degrees
    pub range: f64,
}

impl ScanParams {
    /// Defaults of a short screening scan (5 s, 0.5°, 5°).
    pub fn short(folder: impl Into<String>, base_name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            base_name: base_name.into(),
            exposure_s: 5.0,
            width: 0.5,
            range: 5.0,
        }
    }

    /// Defaults of a full omega scan (5 s, 0.5°, 90°).
    pub fn full(folder: impl Into<String>, base_name: impl Into<String>) -> Self {
        Self {
            range: 90.0,
            ..Self::short(folder, base_name)
        }
    }

    fn validate(&self) -> CapResult<()> {
        if !(self.width.is_finite() && self.width > 0.0) {
            return Err(CapError::InvalidParameter(format!(
                "scan width must be > 0, got {}",
                self.width
            )));
        }
        if !(self.range.is_finite() && self.range > 0.0) {
            return Err(CapError::InvalidParameter(format!(
                "scan range must be > 0, got {}",
                self.range
            )));
        }
        check_exposure(self.exposure_s)
    }

    /// Nominal scan time plus the acquisition margin.
    pub fn timeout_secs(&self) -> u64 {
        acquisition_timeout(self.exposure_s * (self.range / self.width))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CapCommand {
    /// Raw text, sent as-is with the default timeout
    Test { text: String },
    Connect,
    Initialize,
    Disconnect,
    AbsoluteMove { axis: Axis, mm: f64 },
    RelativeMove { axis: Axis, mm: f64 },
    TakeImage {
        folder: String,
        base_name: String,
        exposure_s: f64,
        count: u32,
    },
    ShortOmegaScan(ScanParams),
    OmegaScan(ScanParams),
    GoniometerMove {
        omega: f64,
        theta: f64,
        kappa: f64,
        phi: f64,
    },
    Merge { sequence: Vec<String> },
    Strategy {
        run_file: PathBuf,
        timeout_secs: Option<u64>,
    },
}

impl CapCommand {
    /// Render the command text and timeout for `config`.
    pub fn build(&self, config: &CapConfig) -> CapResult<Command> {
        let table = &config.commands;
        let default_timeout = config.default_timeout_secs;

        let command = match self {
            CapCommand::Test { text } => Command::new(text.clone(), default_timeout),
            CapCommand::Connect => Command::new(table.connect.clone(), default_timeout),
            CapCommand::Initialize => Command::new(table.initialize.clone(), default_timeout),
            CapCommand::Disconnect => Command::new(table.disconnect.clone(), default_timeout),
            CapCommand::AbsoluteMove { axis, mm } => Command::new(
                format!("{} {} {}", table.absolute_move, axis, mm),
                default_timeout,
            ),
            CapCommand::RelativeMove { axis, mm } => Command::new(
                format!("{} {} {}", table.relative_move, axis, mm),
                default_timeout,
            ),
            CapCommand::TakeImage {
                folder,
                base_name,
                exposure_s,
                count,
            } => {
                check_exposure(*exposure_s)?;
                if *count == 0 {
                    return Err(CapError::InvalidParameter(
                        "image count must be at least 1".to_string(),
                    ));
                }
                Command::new(
                    format!(
                        "{} {} {} {} {}",
                        table.take_image,
                        exposure_s,
                        count,
                        output_dir(config, folder),
                        base_name
                    ),
                    acquisition_timeout(*exposure_s),
                )
            }
            CapCommand::ShortOmegaScan(params) => scan(&table.short_omega_scan, params, config)?,
            CapCommand::OmegaScan(params) => scan(&table.omega_scan, params, config)?,
            CapCommand::GoniometerMove {
                omega,
                theta,
                kappa,
                phi,
            } => Command::new(
                format!(
                    "{} {} {} {} {}",
                    table.goniometer_move, omega, theta, kappa, phi
                ),
                default_timeout,
            ),
            CapCommand::Merge { sequence } => {
                if sequence.is_empty() {
                    return Err(CapError::InvalidParameter(
                        "merge needs at least one run".to_string(),
                    ));
                }
                Command::new(
                    format!("{} {}", table.merge, sequence.join(" ")),
                    default_timeout,
                )
            }
            CapCommand::Strategy {
                run_file,
                timeout_secs,
            } => Command::new(
                format!("{} {}", table.strategy, run_file.display()),
                timeout_secs.unwrap_or(default_timeout),
            ),
        };
        Ok(command)
    }
}

fn scan(root: &str, params: &ScanParams, config: &CapConfig) -> CapResult<Command> {
    params.validate()?;
    Ok(Command::new(
        format!(
            "{} {} {} [{} [{}] [{}]]]",
            root,
            output_dir(config, &params.folder),
            params.base_name,
            params.exposure_s,
            params.width,
            params.range
        ),
        params.timeout_secs(),
    ))
}

fn check_exposure(exposure_s: f64) -> CapResult<()> {
    if exposure_s.is_finite() && exposure_s >= 0.0 {
        Ok(())
    } else {
        Err(CapError::InvalidParameter(format!(
            "exposure must be a non-negative number of seconds, got {}",
            exposure_s
        )))
    }
}

/// Whole seconds of `nominal_s` plus the margin, saturating at `u64::MAX`.
fn acquisition_timeout(nominal_s: f64) -> u64 {
    // `as` saturates out-of-range floats
    (nominal_s.ceil() as u64).saturating_add(ACQUISITION_MARGIN_SECS)
}

/// `data_root/folder` with a trailing separator, as CAP expects directories.
fn output_dir(config: &CapConfig, folder: &str) -> String {
    let mut dir = config.data_root.join(folder).display().to_string();
    if !dir.ends_with(MAIN_SEPARATOR) {
        dir.push(MAIN_SEPARATOR);
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CapConfig {
        CapConfig {
            data_root: PathBuf::from("/data"),
            ..CapConfig::default()
        }
    }

    fn sep() -> String {
        MAIN_SEPARATOR.to_string()
    }

    #[test]
    fn test_axis_parsing() {
        assert_eq!("x".parse::<Axis>().unwrap(), Axis::X);
        assert_eq!("z".parse::<Axis>().unwrap(), Axis::Z);
        assert!(matches!("X".parse::<Axis>(), Err(CapError::InvalidAxis(_))));
        assert!("w".parse::<Axis>().is_err());
    }

    #[test]
    fn test_simple_commands_use_default_timeout() {
        let cmd = CapCommand::Connect.build(&config()).unwrap();
        assert_eq!(cmd.text(), "xx xtalcheck connect");
        assert_eq!(cmd.timeout().as_secs(), 60);

        let cmd = CapCommand::Disconnect.build(&config()).unwrap();
        assert_eq!(cmd.text(), "xx xtalcheck disconnect");
    }

    #[test]
    fn test_moves() {
        let cmd = CapCommand::AbsoluteMove { axis: Axis::Y, mm: 1.25 }
            .build(&config())
            .unwrap();
        assert_eq!(cmd.text(), "xx xtalcheck move y 1.25");

        let cmd = CapCommand::RelativeMove { axis: Axis::X, mm: -2.0 }
            .build(&config())
            .unwrap();
        assert_eq!(cmd.text(), "xx xtalcheck mover x -2");
    }

    #[test]
    fn test_take_image() {
        let cmd = CapCommand::TakeImage {
            folder: "images".to_string(),
            base_name: "xtal1".to_string(),
            exposure_s: 10.0,
            count: 3,
        }
        .build(&config())
        .unwrap();
        let dir = format!("{}{}", PathBuf::from("/data").join("images").display(), sep());
        assert_eq!(cmd.text(), format!("xx iss 10 3 {} xtal1", dir));
        assert_eq!(cmd.timeout().as_secs(), 70);
    }

    #[test]
    fn test_take_image_rejects_zero_count() {
        let result = CapCommand::TakeImage {
            folder: "images".to_string(),
            base_name: "xtal1".to_string(),
            exposure_s: 1.0,
            count: 0,
        }
        .build(&config());
        assert!(matches!(result, Err(CapError::InvalidParameter(_))));
    }

    #[test]
    fn test_omega_scan_text_and_timeout() {
        let cmd = CapCommand::OmegaScan(ScanParams::full("scans", "run1"))
            .build(&config())
            .unwrap();
        assert!(cmd.text().starts_with("dc simplescan "));
        assert!(cmd.text().ends_with(" run1 [5 [0.5] [90]]]"));
        // 5 s * (90 / 0.5) frames + margin
        assert_eq!(cmd.timeout().as_secs(), 960);

        let cmd = CapCommand::ShortOmegaScan(ScanParams::short("scans", "screen"))
            .build(&config())
            .unwrap();
        assert!(cmd.text().starts_with("dc simplescreen "));
        assert!(cmd.text().ends_with(" screen [5 [0.5] [5]]]"));
        assert_eq!(cmd.timeout().as_secs(), 110);
    }

    #[test]
    fn test_scan_timeout_rounds_up() {
        let params = ScanParams {
            exposure_s: 0.3,
            width: 0.7,
            range: 1.0,
            ..ScanParams::short("s", "b")
        };
        // 0.3 * 1.428.. = 0.428.. -> 1
        assert_eq!(params.timeout_secs(), 61);
    }

    #[test]
    fn test_huge_acquisition_time_saturates() {
        let params = ScanParams {
            width: 1e-300,
            ..ScanParams::full("s", "b")
        };
        let cmd = CapCommand::OmegaScan(params).build(&config()).unwrap();
        assert_eq!(cmd.timeout().as_secs(), u64::MAX);

        let cmd = CapCommand::TakeImage {
            folder: "images".to_string(),
            base_name: "xtal1".to_string(),
            exposure_s: 1e30,
            count: 1,
        }
        .build(&config())
        .unwrap();
        assert_eq!(cmd.timeout().as_secs(), u64::MAX);
    }

    #[test]
    fn test_scan_rejects_zero_width() {
        let params = ScanParams {
            width: 0.0,
            ..ScanParams::short("s", "b")
        };
        assert!(CapCommand::OmegaScan(params).build(&config()).is_err());
    }

    #[test]
    fn test_goniometer_merge_strategy() {
        let cmd = CapCommand::GoniometerMove {
            omega: 10.0,
            theta: 0.0,
            kappa: -57.5,
            phi: 90.0,
        }
        .build(&config())
        .unwrap();
        assert_eq!(cmd.text(), "xx gonio move 10 0 -57.5 90");

        let cmd = CapCommand::Merge {
            sequence: vec!["run1".to_string(), "run2".to_string()],
        }
        .build(&config())
        .unwrap();
        assert_eq!(cmd.text(), "dc merge run1 run2");

        assert!(CapCommand::Merge { sequence: vec![] }.build(&config()).is_err());

        let cmd = CapCommand::Strategy {
            run_file: PathBuf::from("strategy.run"),
            timeout_secs: Some(3600),
        }
        .build(&config())
        .unwrap();
        assert_eq!(cmd.text(), "dc runstrategy strategy.run");
        assert_eq!(cmd.timeout().as_secs(), 3600);
    }

    #[test]
    fn test_command_table_override() {
        let mut config = config();
        config.commands.connect = "xx xtalcheck connect2".to_string();
        let cmd = CapCommand::Connect.build(&config).unwrap();
        assert_eq!(cmd.text(), "xx xtalcheck connect2");
    }
}
