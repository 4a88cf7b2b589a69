use std::time::Duration;

/// Default time budget of the whole handshake, readiness exchange included
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Knobs of the connection layer
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Ban peers which repeatedly send invalid data
    pub enable_banning: bool,

    pub ban_duration: Duration,

    /// Number of offenses within `offense_window` an address is allowed. One more gets it banned
    pub max_offenses: usize,

    pub offense_window: Duration,

    pub handshake_timeout: Duration,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            enable_banning: true,
            ban_duration: Duration::from_secs(24 * 60 * 60),
            max_offenses: 5,
            offense_window: Duration::from_secs(300),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}
