/// Tuning parameters for a streaming playback session.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Buffered audio required before playback starts or resumes (seconds).
    pub pre_buffer_seconds: f64,
    /// Linear gain ramp applied to the start of the first scheduled chunk (ms).
    pub fade_in_ms: u64,
    /// Linear gain ramp applied on stop before the sink is released (ms).
    pub fade_out_ms: u64,
    /// Consecutive per-chunk failures tolerated before the session aborts.
    pub max_consecutive_errors: u32,
    /// Pause after a recoverable chunk failure before the next read (ms).
    pub retry_delay_ms: u64,
    /// Transport read buffer size in bytes.
    pub read_buffer_bytes: usize,
}

impl Default for PlayerConfig {
    /// Defaults tuned for speech streams: enough pre-buffer to ride out
    /// synthesis jitter without adding noticeable startup latency.
    fn default() -> Self {
        Self {
            pre_buffer_seconds: 1.5,
            fade_in_ms: 50,
            fade_out_ms: 100,
            max_consecutive_errors: 3,
            retry_delay_ms: 100,
            read_buffer_bytes: 8 * 1024,
        }
    }
}
