// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use crate::peer::PeerLimits;

/// Ingest/query core for a real-time observability collector.
#[derive(Debug, Parser, Clone)]
#[command(name = "outrig-serverd", version, about)]
pub struct Config {
    /// Host address to bind the connection multiplexer to.
    #[arg(long, env = "OUTRIG_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// TCP port for the multiplexed HTTP+ingest listener.
    #[arg(long, env = "OUTRIG_PORT", default_value = "5005")]
    pub port: u16,

    /// Unix-domain control socket path, relative to the data directory
    /// unless given as an absolute path. Set to empty to disable.
    #[arg(long, env = "OUTRIG_SOCKET", default_value = "ingest.sock")]
    pub socket: String,

    /// Directory holding the lockfile and control socket.
    #[arg(long, env = "OUTRIG_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Per-peer log ring capacity (lines retained).
    #[arg(long, env = "OUTRIG_LOG_RING_SIZE", default_value = "100000")]
    pub log_ring_size: usize,

    /// Per-peer runtime-stats ring capacity (samples retained).
    #[arg(long, env = "OUTRIG_STATS_RING_SIZE", default_value = "3600")]
    pub stats_ring_size: usize,

    /// Log format (json or text).
    #[arg(long, env = "OUTRIG_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "OUTRIG_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing. Bind/lockfile failures are
    /// detected later, at startup, not here.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("--port must be nonzero");
        }
        if self.log_ring_size == 0 {
            anyhow::bail!("--log-ring-size must be nonzero");
        }
        if self.stats_ring_size == 0 {
            anyhow::bail!("--stats-ring-size must be nonzero");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid --log-format: {other} (want json or text)"),
        }
        Ok(())
    }

    /// Resolve the data directory: `$OUTRIG_DATA_DIR`, else
    /// `$XDG_DATA_HOME/outrig`, else `~/.local/share/outrig`.
    pub fn resolve_data_dir(&self) -> std::path::PathBuf {
        if let Some(ref dir) = self.data_dir {
            return std::path::PathBuf::from(dir);
        }
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return std::path::PathBuf::from(xdg).join("outrig");
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
        std::path::PathBuf::from(home).join(".local/share/outrig")
    }

    /// Resolve the Unix control socket path, or `None` if disabled.
    pub fn resolve_socket_path(&self) -> Option<std::path::PathBuf> {
        if self.socket.is_empty() {
            return None;
        }
        let path = std::path::PathBuf::from(&self.socket);
        if path.is_absolute() {
            Some(path)
        } else {
            Some(self.resolve_data_dir().join(path))
        }
    }

    pub fn peer_limits(&self) -> PeerLimits {
        PeerLimits {
            log_capacity: self.log_ring_size,
            goroutine_capacity_hint: 4096,
            stats_capacity: self.stats_ring_size,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
