//! Provides a means to read, parse and hold configuration options for sweeps.
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::io::{self, BufRead, Write};
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Ports to probe on every address, in the order they were specified.
pub type Ports = Vec<u16>;

/// Behaviour of the bounded results channel when the workers outpace the
/// sink.
///   - Block parks the producing worker until the sink drains an entry,
///     so backpressure reaches the dispatch loop through the job queue.
///   - DropOldest discards the oldest queued result to make room.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    Block,
    DropOldest,
}

/// Parses a port specification such as `3389,80,21-23` into a concrete
/// port list.
///
/// Tokens are split on commas and trimmed; a token is either a literal
/// integer or an inclusive `start-end` range. Order of appearance and
/// duplicates are preserved. Any malformed token fails the entire parse,
/// so callers never see a partial list. The only range check is the
/// parse-time `u16` bound.
pub fn parse_port_spec(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for token in input.split(',') {
        let token = token.trim();
        if token.contains('-') {
            ports.extend(parse_port_range(token)?);
        } else {
            ports.push(parse_single_port(token)?);
        }
    }

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let range_parts: Vec<&str> = range_str.split('-').collect();
    if range_parts.len() != 2 {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 21-23.",
        ));
    }

    let start: u16 = range_parts[0].parse().map_err(|_| {
        format!(
            "Invalid start port '{}' in range '{range_str}'",
            range_parts[0]
        )
    })?;
    let end: u16 = range_parts[1].parse().map_err(|_| {
        format!(
            "Invalid end port '{}' in range '{range_str}'",
            range_parts[1]
        )
    })?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))
}

/// Prints `label` and reads one trimmed line from stdin.
///
/// Backs the interactive variant: options missing from both the command
/// line and the config file are asked for directly.
pub fn prompt(label: &str) -> io::Result<String> {
    print!("{label}");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_owned())
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rdpsweep",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Continuous RDP discovery scanner built in Rust.
/// Sweeps the IPv4 space from a start address and records every host that
/// answers an RDP connection request.
/// WARNING Only point this at infrastructure you are authorised to probe;
/// the sweep runs until the process is killed.
pub struct Opts {
    /// The IPv4 address the sweep starts from. Prompted for when omitted.
    #[arg(short, long)]
    pub address: Option<Ipv4Addr>,

    /// Ports and/or port ranges to probe on every address. Examples: 3389 or 3389,80,21-23
    #[arg(short, long, value_parser = parse_port_spec)]
    pub ports: Option<Ports>,

    /// Number of concurrent probe workers. Also sizes the job queue.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// The timeout in milliseconds applied separately to the connect and
    /// read phase of every probe.
    #[arg(short, long, default_value = "3000")]
    pub timeout: u64,

    /// File that positive results are appended to, one per line.
    #[arg(short, long, default_value = "open-rdp-ip.txt")]
    pub output: PathBuf,

    /// Greppable mode. Only print bare result lines. Useful for grep or
    /// outputting to a file.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Capacity of the results channel. Defaults to the worker count.
    #[arg(long)]
    pub result_buffer: Option<usize>,

    /// What happens to new results while the results channel is full.
    #[arg(long, value_enum, ignore_case = true, default_value = "block")]
    pub overflow: OverflowPolicy,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Port for the keep-alive HTTP listener used by platform health checks.
    #[arg(long, default_value = "8080")]
    pub liveness_port: u16,

    /// Disable the keep-alive HTTP listener.
    #[arg(long)]
    pub no_liveness: bool,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Reads the command line arguments into an Opts struct and merge
    /// values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            timeout, output, greppable, accessible, overflow, liveness_port, no_liveness
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(address, ports, workers, result_buffer, ulimit);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            address: None,
            ports: None,
            workers: None,
            timeout: 3000,
            output: PathBuf::from("open-rdp-ip.txt"),
            greppable: false,
            accessible: false,
            no_config: true,
            config_path: None,
            result_buffer: None,
            overflow: OverflowPolicy::Block,
            ulimit: None,
            liveness_port: 8080,
            no_liveness: false,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Deserialize)]
pub struct Config {
    address: Option<Ipv4Addr>,
    ports: Option<Vec<u16>>,
    workers: Option<usize>,
    timeout: Option<u64>,
    output: Option<PathBuf>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    result_buffer: Option<usize>,
    overflow: Option<OverflowPolicy>,
    ulimit: Option<u64>,
    liveness_port: Option<u16>,
    no_liveness: Option<bool>,
}

#[cfg(not(tarpaulin_include))]
#[allow(clippy::manual_unwrap_or_default)]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct.
    ///
    /// # Format
    ///
    /// address = "10.0.0.0"
    /// ports = [3389, 3390]
    /// workers = 5000
    /// timeout = 3000
    /// overflow = "drop-oldest"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Self {
        let mut content = String::new();
        let config_path = custom_config_path.unwrap_or_else(default_config_path);
        if config_path.exists() {
            content = match fs::read_to_string(config_path) {
                Ok(content) => content,
                Err(_) => String::new(),
            }
        }

        let config: Config = match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                println!("Found {e} in configuration file.\nAborting sweep.\n");
                std::process::exit(1);
            }
        };

        config
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let Some(mut config_path) = dirs::home_dir() else {
        panic!("Could not infer config file path.");
    };
    config_path.push(".rdpsweep.toml");
    config_path
}
