use tessel::config::DEFAULT_PAST_TICK_OFFSET;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,

    /// How many ticks behind the local tick NPCs are replicated at.
    pub past_tick_offset: u32,

    /// How far ahead of the server's reported tick the client starts. The
    /// tick-adjustment controller trims this to the real link latency.
    pub initial_tick_offset: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:41499".into(),
            past_tick_offset: DEFAULT_PAST_TICK_OFFSET,
            initial_tick_offset: 2,
        }
    }
}
