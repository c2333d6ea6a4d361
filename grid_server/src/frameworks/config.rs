use std::{env, net::IpAddr, time::Duration};

// Runtime/server constants; env-driven values fall back to local defaults.

pub fn http_port() -> u16 {
    env::var("GRID_SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000)
}

pub fn bind_ip() -> IpAddr {
    env::var("GRID_SERVER_BIND")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

pub fn grid_size() -> u32 {
    env::var("GRID_SIZE")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|size| *size > 0)
        .unwrap_or(1000)
}

// Unset means persistence stays process-local.
pub fn database_url() -> Option<String> {
    env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty())
}

pub fn db_max_connections() -> u32 {
    env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(5)
}

pub const SESSION_QUEUE_CAPACITY: usize = 256;

pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
// Must stay below READ_TIMEOUT.
pub const PING_PERIOD: Duration = Duration::from_secs(54);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub const MAX_MESSAGE_SIZE: usize = 512;
pub const MAX_COALESCED: usize = 256;
