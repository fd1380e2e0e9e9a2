//! Binary entry point: resolves configuration, spawns the engine and
//! runs the operator loops until the process is interrupted.
use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{bail, Context};
use colored::Colorize;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use rdpsweep::address::parse_start_address;
use rdpsweep::input::{parse_port_spec, prompt, Config, Opts, Ports};
use rdpsweep::probe::RdpProbe;
use rdpsweep::scanner::{EngineConfig, ScanEngine};
use rdpsweep::sink::ResultSink;
use rdpsweep::status;

const BANNER: &str = r"          _
 _ __ __| |_ __  _____      _____  ___ _ __
| '__/ _` | '_ \/ __\ \ /\ / / _ \/ _ \ '_ \
| | | (_| | |_) \__ \\ V  V /  __/  __/ |_) |
|_|  \__,_| .__/|___/ \_/\_/ \___|\___| .__/
          |_|                         |_|";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone());
    opts.merge(&config);
    debug!("Main() `opts` arguments are {opts:?}");

    if !opts.greppable && !opts.accessible {
        println!("{}", BANNER.purple());
        println!("{}", "Sweeps forever. Kill the process to stop.\n".bold());
    }

    let start = resolve_start_address(&opts)?;
    let ports = resolve_ports(&opts)?;
    let workers = resolve_workers(&opts)?;

    adjust_ulimit(&opts, workers);

    let cancel = CancellationToken::new();

    if !opts.no_liveness {
        let liveness_cancel = cancel.clone();
        let liveness_port = opts.liveness_port;
        tokio::spawn(async move {
            if let Err(e) = status::serve_liveness(liveness_port, liveness_cancel).await {
                warn!("Liveness listener failed to start: {e}");
            }
        });
    }

    let engine = ScanEngine::new(
        RdpProbe::new(Duration::from_millis(opts.timeout)),
        EngineConfig {
            workers,
            result_buffer: opts.result_buffer.unwrap_or(workers),
            overflow: opts.overflow,
        },
    );
    let handle = engine.spawn(start, ports, cancel.clone());

    tokio::spawn(status::report_on_keypress(handle.cursor(), cancel.clone()));

    let sink = ResultSink::open(&opts.output, opts.greppable, opts.accessible).await;
    let sink_task = tokio::spawn(sink.run(handle.results()));

    // The sweep has no natural end; an interrupt is the shutdown path.
    tokio::signal::ctrl_c().await.context("wait for interrupt")?;
    warn!("Interrupt received, draining in-flight probes");
    cancel.cancel();
    handle.shutdown().await;
    let _ = sink_task.await;

    Ok(())
}

fn resolve_start_address(opts: &Opts) -> anyhow::Result<Ipv4Addr> {
    if let Some(address) = opts.address {
        return Ok(address);
    }
    let line = prompt("Start IP: ")?;
    parse_start_address(&line).map_err(anyhow::Error::msg)
}

fn resolve_ports(opts: &Opts) -> anyhow::Result<Ports> {
    if let Some(ports) = &opts.ports {
        return Ok(ports.clone());
    }
    let line = prompt("Ports (e.g. 3389,80,21-23): ")?;
    parse_port_spec(&line).map_err(anyhow::Error::msg)
}

fn resolve_workers(opts: &Opts) -> anyhow::Result<usize> {
    let workers = match opts.workers {
        Some(workers) => workers,
        None => prompt("Workers: ")?
            .parse()
            .context("worker count must be a positive integer")?,
    };
    if workers == 0 {
        bail!("worker count must be a positive integer");
    }
    Ok(workers)
}

/// Every worker can hold one socket open, so the soft file limit has to
/// clear the worker count with some headroom for the listener, stdio and
/// the output file.
#[cfg(unix)]
fn adjust_ulimit(opts: &Opts, workers: usize) {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            debug!("Automatically increasing ulimit value to {limit}");
        } else {
            warn!("ERROR. Failed to set ulimit value.");
        }
    }

    match Resource::NOFILE.get() {
        Ok((soft, _)) => {
            let needed = (workers as u64).saturating_add(100);
            if needed > soft {
                warn!(
                    "File limit {soft} is lower than the worker count {workers} needs. Try --ulimit {needed}"
                );
            }
        }
        Err(e) => debug!("Could not read the file limit: {e}"),
    }
}

#[cfg(not(unix))]
fn adjust_ulimit(_opts: &Opts, _workers: usize) {}
