use crate::config::P2pConfig;
use kestrel_core::{info, warn};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    net::IpAddr,
    time::Instant,
};

/// Tracks peer offenses over a sliding window and keeps the list of banned addresses
pub struct BanManager {
    config: P2pConfig,

    /// Banned addresses mapped to the instant their ban expires
    banned: Mutex<HashMap<IpAddr, Instant>>,

    /// Recent offense instants per address, oldest first
    offenses: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl BanManager {
    pub fn new(config: P2pConfig) -> Self {
        Self { config, banned: Mutex::new(HashMap::new()), offenses: Mutex::new(HashMap::new()) }
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.is_banned_at(ip, Instant::now())
    }

    fn is_banned_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut banned = self.banned.lock();
        match banned.get(&ip) {
            Some(&expiry) if expiry > now => true,
            Some(_) => {
                banned.remove(&ip);
                false
            }
            None => false,
        }
    }

    pub fn ban(&self, ip: IpAddr) {
        self.ban_at(ip, Instant::now())
    }

    fn ban_at(&self, ip: IpAddr, now: Instant) {
        info!("P2P, banning {} for {:?}", ip, self.config.ban_duration);
        self.banned.lock().insert(ip, now + self.config.ban_duration);
        self.offenses.lock().remove(&ip);
    }

    pub fn unban(&self, ip: IpAddr) {
        self.banned.lock().remove(&ip);
    }

    pub fn banned_addresses(&self) -> Vec<IpAddr> {
        let now = Instant::now();
        self.banned.lock().iter().filter(|&(_, &expiry)| expiry > now).map(|(&ip, _)| ip).collect()
    }

    /// Records an offense by `ip` and returns whether it caused the address to be banned. Offenses are
    /// only counted when banning is enabled
    pub fn record_offense(&self, ip: IpAddr) -> bool {
        self.record_offense_at(ip, Instant::now())
    }

    fn record_offense_at(&self, ip: IpAddr, now: Instant) -> bool {
        if !self.config.enable_banning {
            return false;
        }
        let count = {
            let mut offenses = self.offenses.lock();
            let window = offenses.entry(ip).or_default();
            window.push_back(now);
            while window.front().is_some_and(|&first| now.duration_since(first) > self.config.offense_window) {
                window.pop_front();
            }
            window.len()
        };
        if count > self.config.max_offenses {
            warn!("P2P, {} committed {} offenses within {:?}", ip, count, self.config.offense_window);
            self.ban_at(ip, now);
            true
        } else {
            false
        }
    }
}
