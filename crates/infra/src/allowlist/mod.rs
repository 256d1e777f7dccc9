//! Network allowlist guard.
//!
//! The guard keeps one `AllowlistSnapshot` (`enabled` flag + entry set) and
//! replaces it whole on every refresh, so readers never observe a flag from
//! one fetch paired with entries from another.
//!
//! Refresh failure policy:
//!
//! | previous snapshot            | result                                  |
//! |------------------------------|-----------------------------------------|
//! | none (cold start)            | disabled, allow everything              |
//! | disabled                     | stays disabled                          |
//! | enabled, non-empty entries   | serve the stale entries                 |
//! | enabled, no entries          | fail closed, every request unavailable  |

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use forgeguard_core::Clock;

mod source;

pub use source::{AllowlistError, AllowlistSource, InMemoryAllowlistSource, PostgresAllowlistSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowlistConfig {
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
}

impl Default for AllowlistConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkDecision {
    Allow,
    /// Caller is not on an enabled allowlist.
    Deny,
    /// The guard cannot decide safely (fail closed).
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    /// Last refresh succeeded.
    Fresh,
    /// Last refresh failed; entries come from an earlier success.
    Stale,
    /// Rule enabled but no entries survived a failed refresh.
    FailClosed,
    /// No refresh has ever succeeded.
    ColdStart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistSnapshot {
    pub enabled: bool,
    pub entries: Arc<HashSet<IpAddr>>,
    pub refreshed_at: DateTime<Utc>,
    pub state: SnapshotState,
}

impl AllowlistSnapshot {
    pub fn decide(&self, ip: Option<IpAddr>) -> NetworkDecision {
        if self.state == SnapshotState::FailClosed {
            return NetworkDecision::Unavailable;
        }
        if !self.enabled || self.entries.is_empty() {
            return NetworkDecision::Allow;
        }

        match ip {
            Some(ip) if self.entries.contains(&normalize(ip)) => NetworkDecision::Allow,
            _ => NetworkDecision::Deny,
        }
    }
}

/// `::ffff:a.b.c.d` compares equal to `a.b.c.d`.
pub fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

pub struct NetworkAllowlistGuard {
    source: Arc<dyn AllowlistSource>,
    config: AllowlistConfig,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<Arc<AllowlistSnapshot>>>,
}

impl NetworkAllowlistGuard {
    pub fn new(
        source: Arc<dyn AllowlistSource>,
        config: AllowlistConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            config,
            clock,
            current: RwLock::new(None),
        }
    }

    /// Decide for one caller, refreshing first when the snapshot is due.
    pub async fn check(&self, ip: Option<IpAddr>) -> NetworkDecision {
        let decision = self.current_snapshot().await.decide(ip);
        if decision != NetworkDecision::Allow {
            debug!(ip = ?ip, decision = ?decision, "network guard rejected request");
        }
        decision
    }

    /// Last published snapshot, without refreshing.
    pub fn snapshot(&self) -> Option<Arc<AllowlistSnapshot>> {
        self.current.read().ok().and_then(|s| s.clone())
    }

    async fn current_snapshot(&self) -> Arc<AllowlistSnapshot> {
        if let Some(snapshot) = self.snapshot() {
            if !self.is_due(&snapshot) {
                return snapshot;
            }
        }
        // Concurrent callers may refresh in parallel; the latest start wins.
        self.refresh().await
    }

    fn is_due(&self, snapshot: &AllowlistSnapshot) -> bool {
        (self.clock.now() - snapshot.refreshed_at)
            .to_std()
            .is_ok_and(|age| age >= self.config.refresh_interval)
    }

    /// Fetch `{enabled, entries}` and publish a new snapshot.
    ///
    /// The failure fallback is derived from whatever is published when the
    /// fetch completes, not from what was published when it started. A
    /// snapshot published by a refresh that started later is never replaced.
    pub async fn refresh(&self) -> Arc<AllowlistSnapshot> {
        let started = self.clock.now();
        let fetched = self.fetch().await;

        let mut current = self.current.write().unwrap_or_else(|poisoned| {
            error!("allowlist snapshot lock poisoned; recovering last snapshot");
            poisoned.into_inner()
        });

        if let Some(newer) = current.as_ref().filter(|s| s.refreshed_at > started) {
            debug!(refreshed_at = %newer.refreshed_at, "newer allowlist snapshot already published");
            return Arc::clone(newer);
        }

        let next = match fetched {
            Ok((enabled, entries)) => AllowlistSnapshot {
                enabled,
                entries: Arc::new(entries),
                refreshed_at: started,
                state: SnapshotState::Fresh,
            },
            Err(e) => on_failure(current.as_deref(), &e, started),
        };

        let next = Arc::new(next);
        *current = Some(Arc::clone(&next));
        next
    }

    async fn fetch(&self) -> Result<(bool, HashSet<IpAddr>), AllowlistError> {
        let fetch = async {
            let enabled = self.source.rule_status().await?;
            let raw = self.source.entries().await?;
            Ok::<_, AllowlistError>((enabled, raw))
        };

        let (enabled, raw) = tokio::time::timeout(self.config.fetch_timeout, fetch)
            .await
            .map_err(|_| AllowlistError::Timeout(self.config.fetch_timeout))??;

        let mut entries = HashSet::with_capacity(raw.len());
        for literal in raw {
            match literal.trim().parse::<IpAddr>() {
                Ok(ip) => {
                    entries.insert(normalize(ip));
                }
                Err(_) => warn!(entry = %literal, "ignoring unparseable allowlist entry"),
            }
        }
        Ok((enabled, entries))
    }
}

fn on_failure(
    previous: Option<&AllowlistSnapshot>,
    err: &AllowlistError,
    now: DateTime<Utc>,
) -> AllowlistSnapshot {
    match previous {
        None => {
            warn!(error = %err, "allowlist unavailable at cold start; allowing all traffic");
            AllowlistSnapshot {
                enabled: false,
                entries: Arc::new(HashSet::new()),
                refreshed_at: now,
                state: SnapshotState::ColdStart,
            }
        }
        Some(prev) if !prev.enabled => {
            debug!(error = %err, "allowlist refresh failed while rule disabled");
            AllowlistSnapshot {
                refreshed_at: now,
                state: match prev.state {
                    SnapshotState::ColdStart => SnapshotState::ColdStart,
                    _ => SnapshotState::Stale,
                },
                ..prev.clone()
            }
        }
        Some(prev) if !prev.entries.is_empty() => {
            warn!(
                error = %err,
                entries = prev.entries.len(),
                "allowlist refresh failed; serving stale entries"
            );
            AllowlistSnapshot {
                refreshed_at: now,
                state: SnapshotState::Stale,
                ..prev.clone()
            }
        }
        Some(_) => {
            error!(error = %err, "allowlist enabled with no entries and refresh failed; failing closed");
            AllowlistSnapshot {
                enabled: true,
                entries: Arc::new(HashSet::new()),
                refreshed_at: now,
                state: SnapshotState::FailClosed,
            }
        }
    }
}

impl core::fmt::Debug for NetworkAllowlistGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetworkAllowlistGuard")
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use forgeguard_core::ManualClock;

    use super::*;

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    fn guard(source: Arc<InMemoryAllowlistSource>) -> (NetworkAllowlistGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guard = NetworkAllowlistGuard::new(
            source,
            AllowlistConfig {
                refresh_interval: Duration::from_secs(60),
                fetch_timeout: Duration::from_millis(50),
            },
            clock.clone(),
        );
        (guard, clock)
    }

    #[tokio::test]
    async fn members_pass_and_others_are_denied() {
        let source = Arc::new(InMemoryAllowlistSource::new(true, ["10.0.0.1", "10.0.0.2"]));
        let (guard, _) = guard(source);

        assert_eq!(guard.check(ip("10.0.0.1")).await, NetworkDecision::Allow);
        assert_eq!(guard.check(ip("10.0.0.3")).await, NetworkDecision::Deny);
        assert_eq!(guard.check(None).await, NetworkDecision::Deny);
    }

    #[tokio::test]
    async fn ipv4_mapped_callers_match_ipv4_entries() {
        let source = Arc::new(InMemoryAllowlistSource::new(true, ["10.0.0.1"]));
        let (guard, _) = guard(source);

        assert_eq!(guard.check(ip("::ffff:10.0.0.1")).await, NetworkDecision::Allow);
    }

    #[tokio::test]
    async fn disabled_rule_allows_everyone() {
        let source = Arc::new(InMemoryAllowlistSource::new(false, ["10.0.0.1"]));
        let (guard, _) = guard(source);

        assert_eq!(guard.check(ip("192.168.1.1")).await, NetworkDecision::Allow);
    }

    #[tokio::test]
    async fn snapshot_is_reused_within_the_interval() {
        let source = Arc::new(InMemoryAllowlistSource::new(true, ["10.0.0.1"]));
        let (guard, clock) = guard(source.clone());

        guard.check(ip("10.0.0.1")).await;
        guard.check(ip("10.0.0.1")).await;
        assert_eq!(source.fetch_count(), 1);

        clock.advance(ChronoDuration::seconds(61));
        guard.check(ip("10.0.0.1")).await;
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn cold_start_failure_fails_open() {
        let source = Arc::new(InMemoryAllowlistSource::new(true, ["10.0.0.1"]));
        source.set_failing(true);
        let (guard, _) = guard(source);

        assert_eq!(guard.check(ip("192.168.1.1")).await, NetworkDecision::Allow);
        assert_eq!(guard.snapshot().unwrap().state, SnapshotState::ColdStart);
    }

    #[tokio::test]
    async fn failure_after_enabled_with_entries_serves_stale_set() {
        let source = Arc::new(InMemoryAllowlistSource::new(true, ["10.0.0.1"]));
        let (guard, clock) = guard(source.clone());
        guard.check(ip("10.0.0.1")).await;

        source.set_failing(true);
        clock.advance(ChronoDuration::seconds(61));

        assert_eq!(guard.check(ip("10.0.0.1")).await, NetworkDecision::Allow);
        assert_eq!(guard.check(ip("10.0.0.9")).await, NetworkDecision::Deny);
        assert_eq!(guard.snapshot().unwrap().state, SnapshotState::Stale);
    }

    #[tokio::test]
    async fn failure_after_enabled_without_entries_fails_closed() {
        let source = Arc::new(InMemoryAllowlistSource::new(true, Vec::<String>::new()));
        let (guard, clock) = guard(source.clone());
        assert_eq!(guard.check(ip("10.0.0.1")).await, NetworkDecision::Allow);

        source.set_failing(true);
        clock.advance(ChronoDuration::seconds(61));

        assert_eq!(guard.check(ip("10.0.0.1")).await, NetworkDecision::Unavailable);
        assert_eq!(guard.check(None).await, NetworkDecision::Unavailable);

        // Recovers on the next successful refresh.
        source.set_failing(false);
        clock.advance(ChronoDuration::seconds(61));
        assert_eq!(guard.check(ip("10.0.0.1")).await, NetworkDecision::Allow);
    }

    #[tokio::test]
    async fn failure_while_disabled_keeps_allowing() {
        let source = Arc::new(InMemoryAllowlistSource::new(false, Vec::<String>::new()));
        let (guard, clock) = guard(source.clone());
        guard.check(None).await;

        source.set_failing(true);
        clock.advance(ChronoDuration::seconds(61));
        assert_eq!(guard.check(ip("1.2.3.4")).await, NetworkDecision::Allow);
    }

    #[tokio::test]
    async fn hung_fetch_times_out_and_counts_as_failure() {
        let source = Arc::new(InMemoryAllowlistSource::new(true, ["10.0.0.1"]));
        let (guard, clock) = guard(source.clone());
        guard.check(ip("10.0.0.1")).await;

        source.set_delay(Some(Duration::from_secs(5)));
        clock.advance(ChronoDuration::seconds(61));

        let snapshot = guard.refresh().await;
        assert_eq!(snapshot.state, SnapshotState::Stale);
        assert_eq!(snapshot.decide(ip("10.0.0.1")), NetworkDecision::Allow);
    }

    /// rule_status: call 0 disabled, call 1 slow failure, later calls enabled.
    #[derive(Default)]
    struct ScriptedSource {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AllowlistSource for ScriptedSource {
        async fn rule_status(&self) -> Result<bool, AllowlistError> {
            match self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                0 => Ok(false),
                1 => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err(AllowlistError::Unavailable("connection reset".to_string()))
                }
                _ => Ok(true),
            }
        }

        async fn entries(&self) -> Result<Vec<String>, AllowlistError> {
            Ok(vec!["10.0.0.1".to_string()])
        }
    }

    #[tokio::test]
    async fn slow_failed_refresh_does_not_roll_back_a_newer_snapshot() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guard = Arc::new(NetworkAllowlistGuard::new(
            Arc::new(ScriptedSource::default()),
            AllowlistConfig {
                refresh_interval: Duration::from_secs(60),
                fetch_timeout: Duration::from_secs(1),
            },
            clock.clone(),
        ));

        // Rule starts disabled.
        assert!(!guard.refresh().await.enabled);

        let slow = tokio::spawn({
            let guard = Arc::clone(&guard);
            async move { guard.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The rule is switched on while the slow fetch is still in flight.
        let fresh = guard.refresh().await;
        assert_eq!(fresh.state, SnapshotState::Fresh);
        assert!(fresh.enabled);

        // The failure lands last and must keep the enabled entries.
        let after_failure = slow.await.unwrap();
        assert!(after_failure.enabled);
        assert_eq!(after_failure.entries, fresh.entries);

        let published = guard.snapshot().unwrap();
        assert!(published.enabled);
        assert_eq!(published.decide(ip("10.0.0.1")), NetworkDecision::Allow);
        assert_eq!(published.decide(ip("10.0.0.9")), NetworkDecision::Deny);
    }

    #[tokio::test]
    async fn refresh_started_earlier_never_replaces_a_later_one() {
        let source = Arc::new(InMemoryAllowlistSource::new(true, ["10.0.0.1"]));
        let (guard, clock) = guard(source.clone());
        let guard = Arc::new(guard);

        source.set_delay(Some(Duration::from_millis(30)));
        let early = tokio::spawn({
            let guard = Arc::clone(&guard);
            async move { guard.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        source.set_delay(None);
        source.set(true, ["10.0.0.2"]);
        clock.advance(ChronoDuration::seconds(1));
        let later = guard.refresh().await;

        let returned = early.await.unwrap();
        assert!(Arc::ptr_eq(&returned, &later));
        assert_eq!(guard.snapshot().unwrap().decide(ip("10.0.0.2")), NetworkDecision::Allow);
    }

    #[tokio::test]
    async fn unparseable_entries_are_skipped() {
        let source = Arc::new(InMemoryAllowlistSource::new(true, ["not-an-ip", " 10.0.0.1 "]));
        let (guard, _) = guard(source);

        let snapshot = guard.refresh().await;
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.decide(ip("10.0.0.1")), NetworkDecision::Allow);
    }
}
