use kestrel_consensus_core::tx::{MutableTransaction, ScriptPublicKey};
use std::collections::{HashMap, VecDeque};

/// Sliding window limiter of compound transactions per sender.
///
/// A compound transaction spends many inputs at once or is unusually heavy. The sender is the
/// script public key of the UTXO spent by the first input. Times are wall clock milliseconds.
pub(crate) struct CompoundRateLimiter {
    input_threshold: usize,
    mass_threshold: u64,
    limit: usize,
    window: u64,
    submissions: HashMap<ScriptPublicKey, VecDeque<u64>>,
}

impl CompoundRateLimiter {
    pub(crate) fn new(input_threshold: usize, mass_threshold: u64, limit: usize, window: u64) -> Self {
        Self { input_threshold, mass_threshold, limit, window, submissions: HashMap::new() }
    }

    pub(crate) fn window(&self) -> u64 {
        self.window
    }

    pub(crate) fn is_compound(&self, transaction: &MutableTransaction) -> bool {
        transaction.tx.inputs.len() >= self.input_threshold || transaction.calculated_mass.unwrap_or_default() >= self.mass_threshold
    }

    /// The sender a compound transaction is accounted to, `None` for transactions which are not compound
    pub(crate) fn compound_sender(&self, transaction: &MutableTransaction) -> Option<ScriptPublicKey> {
        if !self.is_compound(transaction) {
            return None;
        }
        transaction.entries.first().and_then(|entry| entry.as_ref()).map(|entry| entry.script_public_key.clone())
    }

    /// Returns the number of compound transactions `sender` submitted within the window ending at `now`
    /// if that number already reached the limit
    pub(crate) fn check(&mut self, sender: &ScriptPublicKey, now: u64) -> Result<(), usize> {
        let Some(times) = self.submissions.get_mut(sender) else { return Ok(()) };
        Self::drain_expired(times, now, self.window);
        if times.len() >= self.limit {
            return Err(times.len());
        }
        Ok(())
    }

    pub(crate) fn record(&mut self, sender: ScriptPublicKey, now: u64) {
        self.submissions.entry(sender).or_default().push_back(now);
    }

    /// Forgets senders with no submission in the current window
    pub(crate) fn prune(&mut self, now: u64) {
        let window = self.window;
        self.submissions.retain(|_, times| {
            Self::drain_expired(times, now, window);
            !times.is_empty()
        });
    }

    fn drain_expired(times: &mut VecDeque<u64>, now: u64, window: u64) {
        while times.front().is_some_and(|&time| now.saturating_sub(time) >= window) {
            times.pop_front();
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_senders(&self) -> usize {
        self.submissions.len()
    }
}
