//! Starts a bootmesh agent, which rendezvouses with the other group members,
//! launches this node's worker replicas, and publishes the group's address
//! book for clients.

#![warn(clippy::all)]

use bootmesh::error::{Error, Result};
use bootmesh::{bootstrap, Bootstrap, PeerAddress};

use serde::Deserialize;
use std::time::Duration;

fn main() -> Result<()> {
    let args = clap::command!()
        .about("Bootstraps one member of a replicated worker group.")
        .args([
            clap::arg!(-c --config <FILE> "Configuration file path").default_value("bootmesh.yaml"),
            clap::arg!(-p --parallelism [P] "Replica slots per node")
                .value_parser(clap::value_parser!(usize)),
            clap::arg!(--addr [ADDR] "This agent's host:port"),
            clap::arg!(--peers [ADDRS] "Comma-separated peer host:port list"),
            clap::arg!(--id [ID] "This agent's index (local mode)")
                .value_parser(clap::value_parser!(usize)),
            clap::arg!(--"base-port" [PORT] "First agent port (local mode)")
                .value_parser(clap::value_parser!(u16)),
            clap::arg!(--"num-servers" [N] "Group size (local mode)")
                .value_parser(clap::value_parser!(usize)),
        ])
        .get_matches();

    let file_config = FileConfig::load(args.get_one::<String>("config").unwrap())?;

    let log_level = file_config.log_level.parse::<simplelog::LevelFilter>()?;
    let mut log_config = simplelog::ConfigBuilder::new();
    if log_level != simplelog::LevelFilter::Debug {
        log_config.add_filter_allow_str("bootmesh");
    }
    simplelog::SimpleLogger::init(log_level, log_config.build())?;

    let config = file_config.into_config(&args)?;
    let book = Bootstrap::new(config).run()?;
    log::info!("Bootstrap complete: published {} replica rows", book.len());
    Ok(())
}

/// Agent configuration, read from a YAML file merged with BOOTMESH_-prefixed
/// environment variables. Command-line flags take precedence over both.
#[derive(Debug, Deserialize)]
struct FileConfig {
    addr: String,
    peers: Vec<String>,
    parallelism: usize,
    worker_command: Vec<String>,
    store_addr: String,
    store_name: String,
    output_dir: String,
    log_level: String,
    accept_timeout_secs: u64,
    connect_retries: u32,
    connect_backoff_ms: u64,
    connect_timeout_ms: u64,
    read_timeout_secs: u64,
    liveness_interval_ms: u64,
    liveness_retries: u32,
}

impl FileConfig {
    fn load(file: &str) -> Result<Self> {
        Ok(config::Config::builder()
            .set_default("addr", "127.0.0.1:8000")?
            .set_default("peers", Vec::<String>::new())?
            .set_default("parallelism", 1)?
            .set_default("worker_command", Vec::<String>::new())?
            .set_default(
                "store_addr",
                "jdbc:mysql://localhost/?user=escrow{id}&password=e{id}&useSSL=false",
            )?
            .set_default("store_name", "escrow{id}")?
            .set_default("output_dir", ".")?
            .set_default("log_level", "info")?
            .set_default("accept_timeout_secs", 60)?
            .set_default("connect_retries", 30)?
            .set_default("connect_backoff_ms", 200)?
            .set_default("connect_timeout_ms", 1000)?
            .set_default("read_timeout_secs", 60)?
            .set_default("liveness_interval_ms", 1000)?
            .set_default("liveness_retries", 60)?
            .add_source(config::File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("BOOTMESH"))
            .build()?
            .try_deserialize()?)
    }

    /// Builds the bootstrap configuration, applying command-line overrides.
    /// Local mode (--id with --base-port and --num-servers) derives every
    /// agent address on localhost from consecutive ports; otherwise
    /// --addr/--peers or the file values are used as given.
    fn into_config(self, args: &clap::ArgMatches) -> Result<bootstrap::Config> {
        let (addr, peers) = if let Some(&id) = args.get_one::<usize>("id") {
            let base = args
                .get_one::<u16>("base-port")
                .copied()
                .ok_or_else(|| Error::Config("local mode requires --base-port".into()))?;
            let servers = args
                .get_one::<usize>("num-servers")
                .copied()
                .ok_or_else(|| Error::Config("local mode requires --num-servers".into()))?;
            if id >= servers {
                return Err(Error::Config(format!("--id {id} out of range for {servers} servers")));
            }
            let addr = PeerAddress::new("127.0.0.1", base + id as u16);
            let peers = (0..servers)
                .filter(|i| *i != id)
                .map(|i| PeerAddress::new("127.0.0.1", base + i as u16))
                .collect();
            (addr, peers)
        } else {
            let addr = match args.get_one::<String>("addr") {
                Some(addr) => addr.parse()?,
                None => self.addr.parse()?,
            };
            let peers = match args.get_one::<String>("peers") {
                Some(list) => {
                    list.split(',').map(|addr| addr.trim().parse()).collect::<Result<_>>()?
                }
                None => self.peers.iter().map(|addr| addr.parse()).collect::<Result<_>>()?,
            };
            (addr, peers)
        };

        let parallelism =
            args.get_one::<usize>("parallelism").copied().unwrap_or(self.parallelism);
        let mut config = bootstrap::Config::new(addr, peers, parallelism);
        config.worker_command = self.worker_command;
        config.store_addr = self.store_addr;
        config.store_name = self.store_name;
        config.output_dir = self.output_dir.into();
        config.accept_timeout = Duration::from_secs(self.accept_timeout_secs);
        config.connect_retries = self.connect_retries;
        config.connect_backoff = Duration::from_millis(self.connect_backoff_ms);
        config.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        config.read_timeout = Duration::from_secs(self.read_timeout_secs);
        config.liveness_interval = Duration::from_millis(self.liveness_interval_ms);
        config.liveness_retries = self.liveness_retries;
        Ok(config)
    }
}
