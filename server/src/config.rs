//! Tunables for the socket server

use shared::MAX_CLIENTS;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Configuration for [`crate::socket::ServerSocket`].
///
/// The defaults match the game: four players, listening on every IPv4
/// interface.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of simultaneous connections; also the listen backlog
    pub capacity: usize,
    /// Address the listener binds to
    pub bind_ip: IpAddr,
    /// Upper bound on one multiplexer wait. Only used for liveness logging.
    pub poll_timeout: Duration,
    /// Ready descriptors collected per wait
    pub events_capacity: usize,
    /// Size of the buffer used for each client read
    pub read_buffer_size: usize,
    /// How long a write may keep hitting would-block before the send fails
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_CLIENTS,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            poll_timeout: Duration::from_secs(30),
            events_capacity: 10,
            read_buffer_size: 4096,
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_bind_ip(mut self, bind_ip: IpAddr) -> Self {
        self.bind_ip = bind_ip;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.capacity, 4);
        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.read_buffer_size, 4096);
    }

    #[test]
    fn test_builder_setters() {
        let config = ServerConfig::default()
            .with_capacity(2)
            .with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_poll_timeout(Duration::from_millis(100))
            .with_write_timeout(Duration::from_millis(250));

        assert_eq!(config.capacity, 2);
        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.poll_timeout, Duration::from_millis(100));
        assert_eq!(config.write_timeout, Duration::from_millis(250));
    }
}
