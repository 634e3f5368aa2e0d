use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Messages requested per page.
    pub page_limit: usize,
    /// Delay between polls while an assistant turn is awaited.
    pub poll_interval: Duration,
    /// Upper bound for the backed-off poll delay after failures.
    pub max_poll_interval: Duration,
    /// Consecutive poll failures before the view reports being out of sync.
    pub out_of_sync_threshold: u32,
    /// Splice a running assistant placeholder next to each optimistic send.
    pub pair_assistant_placeholder: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_limit: 10,
            poll_interval: Duration::from_secs(5),
            max_poll_interval: Duration::from_secs(40),
            out_of_sync_threshold: 3,
            pair_assistant_placeholder: true,
        }
    }
}
