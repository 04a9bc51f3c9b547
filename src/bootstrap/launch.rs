use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::info;

use super::{BootstrapContext, Config, PeerAddress};
use crate::errconf;
use crate::error::{Error, Result};
use crate::ports;

/// Launches one local worker process per replica slot.
///
/// Slot r on every group member together forms one replicated worker unit, so
/// each worker is handed the slot-r endpoint of every member through a
/// generated parameter file. Workers are order-sensitive while they
/// initialize: slot 0 must reach its listening state before the remaining
/// slots are started. Beyond that the processes are launched and detached;
/// liveness polling is the only supervision signal.
pub fn start_replicas(ctx: &BootstrapContext, config: &Config) -> Result<()> {
    if config.worker_command.is_empty() {
        return errconf!("worker_command is empty");
    }
    // Slot assembly below indexes into every peer's reported endpoints.
    if ctx.peer_replicas.len() != ctx.group.len() - 1 {
        return errconf!(
            "peer parameters incomplete: {} of {} peers reported",
            ctx.peer_replicas.len(),
            ctx.group.len() - 1
        );
    }

    for slot in 0..ctx.replica_addrs.len() {
        let params = write_parameter_file(ctx, slot)?;
        spawn_worker(ctx, config, slot, &params)?;
        info!("Launched worker for replica slot {slot}");
        if slot == 0 && ctx.replica_addrs.len() > 1 {
            ports::wait_listening(
                &[ctx.replica_addrs[0].port],
                config.liveness_interval,
                config.liveness_retries,
            )?;
        }
    }
    Ok(())
}

/// Writes the parameter file handed to the slot's worker: the member count,
/// then one IP line and one Port line per member. Entry 0 is this node's own
/// slot endpoint (the host written as 0.0.0.0, the bind-any form workers
/// expect); entries 1..N-1 are the peers' slot endpoints in group order.
fn write_parameter_file(ctx: &BootstrapContext, slot: usize) -> Result<PathBuf> {
    let peer_endpoints: Vec<&PeerAddress> = ctx
        .peers()
        .map(|peer| &ctx.peer_replicas[peer][slot])
        .collect();

    let mut file = tempfile::Builder::new()
        .prefix("bootmesh-worker-")
        .suffix(".properties")
        .tempfile()?;
    writeln!(file, "NumOfParties = {}", ctx.group.len())?;
    writeln!(file, "IP0 = 0.0.0.0")?;
    for (k, endpoint) in peer_endpoints.iter().enumerate() {
        writeln!(file, "IP{} = {}", k + 1, endpoint.host)?;
    }
    writeln!(file, "Port0 = {}", ctx.replica_addrs[slot].port)?;
    for (k, endpoint) in peer_endpoints.iter().enumerate() {
        writeln!(file, "Port{} = {}", k + 1, endpoint.port)?;
    }

    // The worker reads the file after we exit; don't delete it on drop.
    let (_, path) = file.keep().map_err(|err| Error::IO(err.to_string()))?;
    Ok(path)
}

/// Spawns one worker, appending the replica port, the parameter file and the
/// data-store coordinates to the configured command. Output is discarded and
/// the child is left to run on its own.
fn spawn_worker(ctx: &BootstrapContext, config: &Config, slot: usize, params: &Path) -> Result<()> {
    let (program, args) = config.worker_command.split_first().expect("checked non-empty");
    Command::new(program)
        .args(args)
        .arg(ctx.replica_addrs[slot].port.to_string())
        .arg(params)
        .arg(config.store_addr.replace("{id}", &(ctx.id + 1).to_string()))
        .arg(config.store_name.replace("{id}", &(ctx.id + 1).to_string()))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| Error::Launch(format!("starting worker for slot {slot}: {err}")))?;
    Ok(())
}
