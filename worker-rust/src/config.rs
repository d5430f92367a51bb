use grid_protocol::{NetworkMode, PeerRole, PollOptions, TransportSettings};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub session: String,
    pub mode: NetworkMode,
    /// Relay address for LAN mode
    pub relay_addr: String,
    pub store_url: Option<String>,
    pub store_dir: Option<PathBuf>,
    pub auth_token: String,
    /// Prefix of every worker loop's name
    pub worker_name: String,
    pub workers: usize,
    pub work_dir: PathBuf,
    pub poll_interval_secs: u64,
    /// Upper bound of a single receive call
    pub receive_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Config {
    /// Name of loop `index`; a single loop keeps the plain name
    pub fn loop_name(&self, index: usize) -> String {
        if self.workers <= 1 {
            self.worker_name.clone()
        } else {
            format!("{}-{}", self.worker_name, index)
        }
    }

    pub fn transport(&self, name: &str) -> TransportSettings {
        TransportSettings {
            mode: self.mode,
            relay_addr: self.relay_addr.clone(),
            store_url: self.store_url.clone(),
            store_dir: self.store_dir.clone(),
            token: self.auth_token.clone(),
            role: PeerRole::Worker,
            session: self.session.clone(),
            name: name.to_string(),
            backup_dir: Some(self.work_dir.join("backups")),
        }
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions::wait(
            Duration::from_secs(self.receive_timeout_secs),
            Duration::from_secs(self.poll_interval_secs.max(1)),
        )
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[cfg(test)]
pub(crate) fn test_config(mode: NetworkMode) -> Config {
    Config {
        session: "s".into(),
        mode,
        relay_addr: "127.0.0.1:7435".into(),
        store_url: None,
        store_dir: None,
        auth_token: "t".into(),
        worker_name: "box".into(),
        workers: 1,
        work_dir: PathBuf::from("./worker-data"),
        poll_interval_secs: 1,
        receive_timeout_secs: 30,
        reconnect_delay_secs: 10,
    }
}
