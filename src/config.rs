//! Startup argument/config block (C11).
//!
//! A `clap` derive-API CLI covering the flags, defaults, and validation
//! a task board node needs at startup.

use clap::Parser;

use crate::error::{Error, ErrorKind};

pub const PORT_MIN: u16 = 1024;
pub const PORT_MAX: u16 = 65535;
const DEFAULT_SERIAL: i32 = 1;

/// Startup parameters for a task board node (C11).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskboard-node",
    about = "Task board node: device/fog/cloud task execution endpoint"
)]
pub struct Args {
    /// Application id (required, non-empty)
    #[arg(short = 'a', long = "appid")]
    appid: Option<String>,

    /// Serial number, must be > 0
    #[arg(short = 'n', long = "serial", default_value_t = DEFAULT_SERIAL)]
    pub serial_number: i32,

    /// Group id
    #[arg(short = 'g', long = "group")]
    pub group_id: Option<i32>,

    /// Tag string
    #[arg(short = 't', long = "tag")]
    pub tag: Option<String>,

    /// Port, must be in [PORT_MIN, PORT_MAX]
    #[arg(short = 'p', long = "port", default_value_t = 1883)]
    pub port: u16,

    /// Number of executors (secondary queues), >= 0
    #[arg(short = 'x', long = "executors", default_value_t = default_executors())]
    pub num_executors: i32,
}

fn default_executors() -> i32 {
    num_cpus::get().saturating_sub(1).max(0) as i32
}

impl Args {
    /// Parse `argv`-style arguments and validate them, returning a
    /// [`Configuration`] or a [`Error`] with kind
    /// [`ErrorKind::Configuration`]. Unlike `clap`'s own exit-on-error
    /// behavior this returns a value so callers (including tests) can
    /// decide how to report it; the binary entry point converts a
    /// `Configuration` error into a one-line-usage-then-exit.
    pub fn parse_and_validate<I, T>(argv: I) -> Result<Configuration, Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let args = Args::try_parse_from(argv)
            .map_err(|e| Error::new(ErrorKind::Configuration, e.to_string()))?;
        args.into_configuration()
    }

    fn into_configuration(self) -> Result<Configuration, Error> {
        let appid = self.appid.ok_or_else(|| {
            Error::new(ErrorKind::Configuration, "Appid is not specified")
        })?;
        if appid.is_empty() {
            return Err(Error::new(ErrorKind::Configuration, "Appid is not specified"));
        }
        if !(PORT_MIN..=PORT_MAX).contains(&self.port) {
            return Err(Error::new(
                ErrorKind::Configuration,
                format!("Invalid port given {}", self.port),
            ));
        }
        if self.serial_number <= 0 {
            return Err(Error::new(
                ErrorKind::Configuration,
                format!("Invalid serial number given {}", self.serial_number),
            ));
        }
        if self.num_executors < 0 {
            return Err(Error::new(
                ErrorKind::Configuration,
                format!("Invalid number of executors given {}", self.num_executors),
            ));
        }

        Ok(Configuration {
            appid,
            serial_number: self.serial_number,
            group_id: self.group_id,
            tag: self.tag,
            port: self.port,
            num_executors: self.num_executors as usize,
        })
    }
}

/// Validated startup configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub appid: String,
    pub serial_number: i32,
    pub group_id: Option<i32>,
    pub tag: Option<String>,
    pub port: u16,
    pub num_executors: usize,
}
