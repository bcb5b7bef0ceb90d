use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use simplepipe_frame::PipeStatus;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod keygen;
pub mod request;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate pipe keys.
    Keygen(KeygenArgs),
    /// Encode one segment to stdout.
    Encode(EncodeArgs),
    /// Decode a response body into segments.
    Decode(DecodeArgs),
    /// Build or parse pipe request forms.
    Request(RequestArgs),
    /// Run producers and short-poll consumers in-process and report pipe statistics.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Keygen(args) => keygen::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Request(args) => request::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Number of keys to generate.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: usize,
    /// Seed for reproducible keys.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum StatusArg {
    Ok,
    Destroyed,
    Continue,
    Lost,
}

impl From<StatusArg> for PipeStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Ok => PipeStatus::Ok,
            StatusArg::Destroyed => PipeStatus::Destroyed,
            StatusArg::Continue => PipeStatus::Continue,
            StatusArg::Lost => PipeStatus::Lost,
        }
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Pipe key (six characters from [0-9a-zA-Z]).
    pub key: String,
    /// Emit a payload-less status segment.
    #[arg(long, value_enum, conflicts_with_all = ["tag", "json", "data", "file"])]
    pub status: Option<StatusArg>,
    /// Payload tag.
    #[arg(long, short = 't', required_unless_present = "status")]
    pub tag: Option<String>,
    /// JSON payload body.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload body.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read the payload body from a file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Schema directory (`<Tag>.schema.json`) to validate the body against.
    #[arg(long, value_name = "DIR", env = "SIMPLEPIPE_SCHEMA_DIR")]
    pub validate: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// File holding the response body. Reads stdin when omitted or `-`.
    pub input: Option<PathBuf>,
    /// Treat `e` after a key as a CONTINUE status.
    #[arg(long)]
    pub allow_continue: bool,
    /// Maximum payload body size in bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_payload: Option<usize>,
    /// Schema directory (`<Tag>.schema.json`) to validate bodies against.
    #[arg(long, value_name = "DIR", env = "SIMPLEPIPE_SCHEMA_DIR")]
    pub validate: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    #[command(subcommand)]
    pub action: RequestAction,
}

#[derive(Subcommand, Debug)]
pub enum RequestAction {
    /// Build a request form.
    Build(RequestBuildArgs),
    /// Parse a request form.
    Parse(RequestParseArgs),
}

#[derive(Args, Debug)]
pub struct RequestBuildArgs {
    /// Pipe key.
    pub key: String,
    /// Request type character: q, u, n, s, x or c.
    #[arg(long = "type", short = 't', default_value = "q")]
    pub kind: char,
    /// Client pipe sequence.
    #[arg(long, short = 's', default_value = "0")]
    pub sequence: u64,
    /// Request counter.
    #[arg(long, short = 'r', default_value = "0")]
    pub counter: u64,
    /// Subdomain for cross-domain transports.
    #[arg(long)]
    pub domain: Option<String>,
}

#[derive(Args, Debug)]
pub struct RequestParseArgs {
    /// Form such as `k=Ab12Cd&t=q&s=1&r=2`.
    pub form: String,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Pipes whose consumer keeps polling.
    #[arg(long, default_value = "3")]
    pub pipes: usize,
    /// Pipes whose consumer disappears after the first poll.
    #[arg(long, default_value = "1")]
    pub abandoned: usize,
    /// Events pushed into each pipe.
    #[arg(long, default_value = "10")]
    pub messages: u32,
    /// How long to run (e.g. 1500ms, 2s).
    #[arg(long, default_value = "1500ms")]
    pub duration: String,
    /// JSON pipe configuration (durations in milliseconds).
    #[arg(long, value_name = "FILE", env = "SIMPLEPIPE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
