//! Interfaces consumed from the surrounding application: progress display
//! and key storage. Peer selection lives in `hdrop-discovery`, next to the
//! peer view it chooses from.

use crate::error::HdropResult;

/// Receives 0..=100 percentage updates during a send or receive.
pub trait ProgressSink: Send {
    fn report(&mut self, percent: u8);
}

impl<F> ProgressSink for F
where
    F: FnMut(u8) + Send,
{
    fn report(&mut self, percent: u8) {
        self(percent)
    }
}

/// Supplies the transfer key. `Ok(None)` means transfers run unencrypted.
pub trait KeyProvider {
    fn load_key(&self) -> HdropResult<Option<Vec<u8>>>;
}

/// Percentage of `total` covered by `done`, clamped to 100.
/// An empty total counts as complete.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (done as u128 * 100) / total as u128;
    pct.min(100) as u8
}
