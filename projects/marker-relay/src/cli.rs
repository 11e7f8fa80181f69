use crate::run_context::DetectionMethod;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding the input frame sequence
    #[arg(short, long, env = "MARKER_RELAY_INPUT")]
    pub input: PathBuf,

    /// Annotated-output directory, optionally suffixed with a 4-character
    /// codec tag (dir:FOURCC)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Detection method
    #[arg(long, value_enum, default_value_t = DetectionMethod::Aruco)]
    pub method: DetectionMethod,

    /// Marker ids to track, each 1-4
    #[arg(short, long, value_delimiter = ',', default_values_t = [1u8, 2, 3, 4])]
    pub markers: Vec<u8>,

    /// Gui verbosity: 0 quiet, 1 progress, 2 per-frame table dumps
    #[arg(short, long, default_value_t = 0)]
    pub gui_level: u8,

    /// Camera id stamped on every position datagram
    #[arg(long, env = "MARKER_RELAY_CAMERA_ID", default_value_t = 0)]
    pub camera_id: u32,

    /// Host receiving position datagrams
    #[arg(long, env = "MARKER_RELAY_SERVER_HOST", default_value = "127.0.0.1")]
    pub server_host: IpAddr,

    /// Port receiving position datagrams
    #[arg(long, env = "MARKER_RELAY_SERVER_PORT", default_value_t = 4242)]
    pub server_port: u16,

    /// Camera calibration file
    #[arg(long, default_value = "calibration.json")]
    pub calibration: PathBuf,

    /// Nominal source frame rate
    #[arg(long, default_value_t = 30.0)]
    pub fps: f64,

    /// Deadline for one detection round, milliseconds
    #[arg(long, default_value_t = 500)]
    pub round_timeout_ms: u64,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
