use p2d_core::IceServerConfig;
use std::time::Duration;

/// Reconnect backoff tuning for the signaling client.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Fractional jitter applied to each delay, e.g. 0.25 for ±25 %.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: 0.25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Application-level Ping cadence.
    pub ping_interval: Duration,
    /// The link is declared dead after this long without inbound traffic.
    pub idle_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(6),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Average byte-magnitude threshold on the 0–255 scale.
    pub threshold: u8,
    /// Analysis cadence.
    pub tick: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 20,
            tick: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rendezvous server URL, e.g. `ws://localhost:9000/ws`.
    pub signaling_url: String,
    pub ice_servers: Vec<IceServerConfig>,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub vad: VadConfig,
    /// Outbound envelopes buffered while the link is down; oldest are
    /// discarded past this bound.
    pub outbound_buffer: usize,
    /// Decode and play remote audio tracks on the default output device.
    pub play_remote_audio: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:9000/ws".to_owned(),
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_owned()],
                username: None,
                credential: None,
            }],
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            vad: VadConfig::default(),
            outbound_buffer: 32,
            play_remote_audio: true,
        }
    }
}
