//! TCP Rendezvous - env-configured process group
//!
//! Rank 0 listens on `MASTER_ADDR:MASTER_PORT`, every other rank connects and
//! announces itself (big-endian u32). Once all ranks arrived, rank 0 sends a
//! one-byte acknowledgement to each peer. The whole exchange is bounded by the
//! timeout handed to `init_process_group`.

use std::env;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::DistError;
use crate::process_group::ProcessGroup;

const ACK: u8 = 0xA5;
const CONNECT_RETRY: Duration = Duration::from_millis(50);

pub const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";
pub const DEFAULT_MASTER_PORT: u16 = 29500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousConfig {
    pub master_addr: String,
    pub master_port: u16,
    pub world_size: usize,
    pub rank: usize,
}

impl RendezvousConfig {
    /// Read `WORLD_SIZE`, `RANK`, `MASTER_ADDR` and `MASTER_PORT`.
    /// Missing variables describe a single-process run.
    pub fn from_env() -> Result<Self, DistError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, DistError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, DistError> {
            match raw {
                Some(v) => v
                    .trim()
                    .parse::<T>()
                    .map_err(|_| DistError::Env(format!("{key}={v:?} is not a valid number"))),
                None => Ok(default),
            }
        }

        let config = Self {
            master_addr: lookup("MASTER_ADDR").unwrap_or_else(|| DEFAULT_MASTER_ADDR.to_string()),
            master_port: parse("MASTER_PORT", lookup("MASTER_PORT"), DEFAULT_MASTER_PORT)?,
            world_size: parse("WORLD_SIZE", lookup("WORLD_SIZE"), 1)?,
            rank: parse("RANK", lookup("RANK"), 0)?,
        };
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), DistError> {
        if self.world_size == 0 {
            return Err(DistError::Env("WORLD_SIZE must be at least 1".to_string()));
        }
        if self.rank >= self.world_size {
            return Err(DistError::Env(format!(
                "RANK={} is outside WORLD_SIZE={}",
                self.rank, self.world_size
            )));
        }
        Ok(())
    }
}

pub struct TcpRendezvous {
    config: RendezvousConfig,
    backend: Option<String>,
}

impl TcpRendezvous {
    pub fn new(config: RendezvousConfig) -> Self {
        Self {
            config,
            backend: None,
        }
    }

    pub fn from_env() -> Result<Self, DistError> {
        Ok(Self::new(RendezvousConfig::from_env()?))
    }

    /// Backend name recorded by a successful `init_process_group`.
    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }
}

impl ProcessGroup for TcpRendezvous {
    fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    fn init_process_group(&mut self, backend: &str, timeout: Duration) -> Result<(), DistError> {
        self.config.check()?;
        info!(
            "Joining process group: backend={}, rank={}/{}, master={}:{}, timeout={:?}",
            backend,
            self.config.rank,
            self.config.world_size,
            self.config.master_addr,
            self.config.master_port,
            timeout
        );

        if self.config.world_size > 1 {
            let config = self.config.clone();
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async {
                let exchange = async {
                    if config.rank == 0 {
                        serve(&config).await
                    } else {
                        join(&config).await
                    }
                };
                tokio::time::timeout(timeout, exchange)
                    .await
                    .map_err(|_| DistError::Timeout(timeout))?
            })?;
        }

        self.backend = Some(backend.to_string());
        info!("✅ Process group ready (rank {})", self.config.rank);
        Ok(())
    }

    fn world_size(&self) -> Result<usize, DistError> {
        if !self.is_initialized() {
            return Err(DistError::NotInitialized);
        }
        Ok(self.config.world_size)
    }

    fn rank(&self) -> Result<usize, DistError> {
        if !self.is_initialized() {
            return Err(DistError::NotInitialized);
        }
        Ok(self.config.rank)
    }
}

async fn serve(config: &RendezvousConfig) -> Result<(), DistError> {
    let listener = TcpListener::bind((config.master_addr.as_str(), config.master_port)).await?;
    let expected = config.world_size - 1;
    let mut seen = vec![false; config.world_size];
    seen[0] = true;
    let mut peers: Vec<TcpStream> = Vec::with_capacity(expected);

    while peers.len() < expected {
        let (mut stream, addr) = listener.accept().await?;
        let rank = stream.read_u32().await? as usize;
        if rank >= config.world_size {
            return Err(DistError::Protocol(format!(
                "peer {addr} announced rank {rank} outside world size {}",
                config.world_size
            )));
        }
        if seen[rank] {
            return Err(DistError::Protocol(format!("rank {rank} joined twice (last from {addr})")));
        }
        seen[rank] = true;
        debug!("rank {} joined from {} ({}/{})", rank, addr, peers.len() + 2, config.world_size);
        peers.push(stream);
    }

    for stream in peers.iter_mut() {
        stream.write_u8(ACK).await?;
        stream.flush().await?;
    }
    Ok(())
}

async fn join(config: &RendezvousConfig) -> Result<(), DistError> {
    // Rank 0 may not be listening yet; keep trying until the outer timeout fires.
    let mut stream = loop {
        match TcpStream::connect((config.master_addr.as_str(), config.master_port)).await {
            Ok(stream) => break stream,
            Err(e) => {
                debug!("master not reachable yet: {}", e);
                tokio::time::sleep(CONNECT_RETRY).await;
            }
        }
    };

    let rank = u32::try_from(config.rank).map_err(|_| DistError::Env(format!("RANK={} too large", config.rank)))?;
    stream.write_u32(rank).await?;
    stream.flush().await?;

    let ack = stream.read_u8().await?;
    if ack != ACK {
        return Err(DistError::Protocol(format!("unexpected acknowledgement byte {ack:#04x}")));
    }
    Ok(())
}
