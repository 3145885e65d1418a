//! PING/PONG liveness tracking for interface sources.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::bus::SubscriptionId;
use crate::error::ProtocolError;

pub struct Liveness {
    window: Duration,
    next_id: u64,
    outstanding: HashMap<SubscriptionId, (String, Instant)>,
}

impl Liveness {
    pub fn new(window: Duration) -> Self {
        Liveness {
            window,
            next_id: 1,
            outstanding: HashMap::new(),
        }
    }

    /// Record a PING to `source` and return its id. A source only ever has
    /// one outstanding PING; an older unanswered one is kept.
    pub fn ping(&mut self, source: SubscriptionId, now: Instant) -> Option<String> {
        if self.outstanding.contains_key(&source) {
            return None;
        }
        let id = self.next_id.to_string();
        self.next_id += 1;
        self.outstanding.insert(source, (id.clone(), now));
        Some(id)
    }

    /// Match a PONG. A wrong id, a late answer, or a PONG nobody asked for
    /// all mean the source is unresponsive.
    pub fn pong(&mut self, source: SubscriptionId, id: &str, now: Instant) -> Result<(), ProtocolError> {
        match self.outstanding.remove(&source) {
            Some((expected, sent)) if expected == id => {
                if now.duration_since(sent) <= self.window {
                    Ok(())
                } else {
                    Err(ProtocolError::PongTimeout {
                        id: id.to_string(),
                        window: self.window,
                    })
                }
            }
            Some(_) | None => Err(ProtocolError::UnexpectedPong { id: id.to_string() }),
        }
    }

    /// Sources whose PING went unanswered past the window. They are
    /// forgotten once reported.
    pub fn expired(&mut self, now: Instant) -> Vec<(SubscriptionId, ProtocolError)> {
        let window = self.window;
        let late: Vec<SubscriptionId> = self
            .outstanding
            .iter()
            .filter(|(_, (_, sent))| now.duration_since(*sent) > window)
            .map(|(source, _)| *source)
            .collect();
        late.into_iter()
            .filter_map(|source| {
                self.outstanding.remove(&source).map(|(id, _)| {
                    (source, ProtocolError::PongTimeout { id, window })
                })
            })
            .collect()
    }

    /// When the oldest outstanding PING expires.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.outstanding
            .values()
            .map(|(_, sent)| *sent + self.window)
            .min()
    }

    pub fn forget(&mut self, source: SubscriptionId) {
        self.outstanding.remove(&source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_pong_in_window() {
        let mut l = Liveness::new(Duration::from_secs(5));
        let t0 = Instant::now();
        let id = l.ping(1, t0).unwrap();
        assert!(l.pong(1, &id, t0 + Duration::from_secs(1)).is_ok());
        assert!(l.next_deadline().is_none());
    }

    #[test]
    fn wrong_id_is_unexpected() {
        let mut l = Liveness::new(Duration::from_secs(5));
        let t0 = Instant::now();
        l.ping(1, t0).unwrap();
        let err = l.pong(1, "999", t0).unwrap_err();
        assert!(err.drops_source());
        assert_eq!(err.as_label(), "protocol_unexpected_pong");
    }

    #[test]
    fn late_pong_times_out() {
        let mut l = Liveness::new(Duration::from_secs(5));
        let t0 = Instant::now();
        let id = l.ping(1, t0).unwrap();
        let err = l.pong(1, &id, t0 + Duration::from_secs(6)).unwrap_err();
        assert_eq!(err.as_label(), "protocol_pong_timeout");
    }

    #[test]
    fn expiry_reports_and_forgets() {
        let mut l = Liveness::new(Duration::from_secs(5));
        let t0 = Instant::now();
        l.ping(1, t0).unwrap();
        l.ping(2, t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(l.next_deadline(), Some(t0 + Duration::from_secs(5)));
        let gone = l.expired(t0 + Duration::from_secs(6));
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].0, 1);
        assert!(l.expired(t0 + Duration::from_secs(6)).is_empty());
    }

    #[test]
    fn one_outstanding_ping_per_source() {
        let mut l = Liveness::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(l.ping(1, t0).is_some());
        assert!(l.ping(1, t0).is_none());
    }
}
