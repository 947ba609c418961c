//! Garbage retention policy.
//!
//! Unreachable-garbage packs are never dropped eagerly: racing inserters
//! may have decided an object is already present in one of them and skipped
//! re-writing it. The policy here decides, per pack, whether it is safe to
//! drop (expired), worth folding into the next garbage pack (coalesceable),
//! or must be left in place.

use chrono::{FixedOffset, NaiveTime, TimeZone};

use crate::desc::{PackDescription, PackExt, PackSource};

/// Default upper size bound for coalescing garbage packs (50 MiB).
pub const DEFAULT_COALESCE_GARBAGE_LIMIT: u64 = 50 << 20;

/// Default time-to-live for unreachable garbage (24 hours).
pub const DEFAULT_GARBAGE_TTL_MILLIS: u64 = 24 * 60 * 60 * 1000;

const DAY_MILLIS: u64 = 24 * 60 * 60 * 1000;

/// Decision rules for `UNREACHABLE_GARBAGE` packs.
///
/// Expiry requires both that a later collection run has already observed
/// the pack (so any reachable object in it was copied out) and that the
/// time-to-live has elapsed (so racing inserters had time to re-add
/// anything they depend on).
///
/// Coalescing folds small garbage packs created in a close time interval
/// into one, bounding the number of garbage packs kept: at most
/// `ttl_in_days + 1` when the ttl exceeds one day, at most 4 otherwise
/// (packs made within one third of the ttl share a slot).
#[derive(Debug, Clone)]
pub struct GarbagePolicy {
    coalesce_garbage_limit: u64,
    garbage_ttl_millis: u64,
    time_zone: FixedOffset,
}

impl GarbagePolicy {
    /// Creates a policy with the given tunables, doing calendar-day
    /// arithmetic in `time_zone`.
    #[must_use]
    pub fn new(coalesce_garbage_limit: u64, garbage_ttl_millis: u64, time_zone: FixedOffset) -> Self {
        Self {
            coalesce_garbage_limit,
            garbage_ttl_millis,
            time_zone,
        }
    }

    /// Returns true when the pack may be pruned without reading it.
    ///
    /// `most_recent_gc` is the newest last-modified over GC and GC_REST
    /// packs, or 0 when no prior collection exists; in that case nothing
    /// expires, since no run can have copied the pack's live objects out.
    #[must_use]
    pub fn is_expired(&self, desc: &PackDescription, most_recent_gc: i64, now_ms: i64) -> bool {
        let ttl = i64::try_from(self.garbage_ttl_millis).unwrap_or(i64::MAX);
        desc.source() == PackSource::UnreachableGarbage
            && desc.last_modified_ms() < most_recent_gc
            && self.garbage_ttl_millis > 0
            && now_ms - desc.last_modified_ms() >= ttl
    }

    /// Returns true when the pack should be folded into the next garbage
    /// pack.
    #[must_use]
    pub fn is_coalesceable(&self, desc: &PackDescription, now_ms: i64) -> bool {
        if desc.source() != PackSource::UnreachableGarbage
            || desc.file_size(PackExt::Pack) >= self.coalesce_garbage_limit
        {
            return false;
        }

        if self.garbage_ttl_millis == 0 {
            return true;
        }

        let last_modified = desc.last_modified_ms();
        let day_start_last_modified = self.day_start_millis(last_modified);
        let day_start_today = self.day_start_millis(now_ms);

        if day_start_last_modified != day_start_today {
            return false;
        }

        if self.garbage_ttl_millis > DAY_MILLIS {
            return true;
        }

        let time_interval = i64::try_from(self.garbage_ttl_millis / 3).unwrap_or(i64::MAX);
        if time_interval == 0 {
            return false;
        }

        let modified_time_slot = (last_modified - day_start_last_modified) / time_interval;
        let present_time_slot = (now_ms - day_start_today) / time_interval;
        modified_time_slot == present_time_slot
    }

    /// Start of the calendar day containing `millis`, in the policy zone.
    #[must_use]
    pub fn day_start_millis(&self, millis: i64) -> i64 {
        // A fixed offset makes both conversions unambiguous; the fallbacks
        // only trigger on timestamps outside chrono's representable range.
        let Some(local) = self.time_zone.timestamp_millis_opt(millis).single() else {
            return millis;
        };
        let midnight = local.date_naive().and_time(NaiveTime::MIN);
        match self.time_zone.from_local_datetime(&midnight).single() {
            Some(start) => start.timestamp_millis(),
            None => millis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Offset as _;
    use chrono::Utc;

    const HOUR: i64 = 60 * 60 * 1000;
    const DAY: i64 = 24 * HOUR;

    fn garbage(last_modified: i64, pack_size: u64) -> PackDescription {
        let mut desc = PackDescription::new("g", PackSource::UnreachableGarbage, 0);
        desc.set_last_modified_ms(last_modified);
        desc.set_file_size(PackExt::Pack, pack_size);
        desc
    }

    fn policy(limit: u64, ttl: u64) -> GarbagePolicy {
        GarbagePolicy::new(limit, ttl, Utc.fix())
    }

    #[test]
    fn zero_ttl_never_expires() {
        let p = policy(DEFAULT_COALESCE_GARBAGE_LIMIT, 0);
        let desc = garbage(0, 1024);
        assert!(!p.is_expired(&desc, i64::MAX, i64::MAX));
    }

    #[test]
    fn expiry_needs_age_at_least_ttl() {
        let p = policy(DEFAULT_COALESCE_GARBAGE_LIMIT, 1);
        let desc = garbage(5_000, 1024);
        // age == 0 with ttl of 1 ms: not yet expired
        assert!(!p.is_expired(&desc, 10_000, 5_000));
        // age == ttl: expired
        assert!(p.is_expired(&desc, 10_000, 5_001));
    }

    #[test]
    fn expiry_requires_predating_most_recent_gc() {
        let p = policy(DEFAULT_COALESCE_GARBAGE_LIMIT, 1);
        let desc = garbage(5_000, 1024);
        // equal timestamps: strict < fails
        assert!(!p.is_expired(&desc, 5_000, i64::MAX / 2));
        assert!(p.is_expired(&desc, 5_001, i64::MAX / 2));
    }

    #[test]
    fn nothing_expires_without_a_prior_gc() {
        let p = policy(DEFAULT_COALESCE_GARBAGE_LIMIT, 1);
        // most_recent_gc == 0 and last_modified >= 0: strict < never holds
        let desc = garbage(0, 1024);
        assert!(!p.is_expired(&desc, 0, i64::MAX / 2));
    }

    #[test]
    fn non_garbage_sources_never_expire() {
        let p = policy(DEFAULT_COALESCE_GARBAGE_LIMIT, 1);
        let mut desc = PackDescription::new("p", PackSource::Insert, 0);
        desc.set_last_modified_ms(0);
        assert!(!p.is_expired(&desc, i64::MAX / 2, i64::MAX / 2));
        assert!(!p.is_coalesceable(&desc, 0));
    }

    #[test]
    fn coalesce_requires_size_strictly_below_limit() {
        let size = 10 << 20;
        let now = 6 * HOUR;
        let desc = garbage(now - HOUR, size);

        // limit below or at the size: left alone
        assert!(!policy(size - 1, 0).is_coalesceable(&desc, now));
        assert!(!policy(size, 0).is_coalesceable(&desc, now));
        // limit above the size: folded
        assert!(policy(size + 1, 0).is_coalesceable(&desc, now));
    }

    #[test]
    fn zero_limit_disables_coalescing() {
        let desc = garbage(0, 0);
        assert!(!policy(0, 0).is_coalesceable(&desc, 0));
    }

    #[test]
    fn zero_ttl_coalesces_any_day() {
        let p = policy(DEFAULT_COALESCE_GARBAGE_LIMIT, 0);
        let desc = garbage(0, 1024);
        assert!(p.is_coalesceable(&desc, 400 * DAY));
    }

    #[test]
    fn long_ttl_coalesces_same_day_only() {
        let p = policy(DEFAULT_COALESCE_GARBAGE_LIMIT, u64::try_from(2 * DAY).expect("ttl"));
        let morning = 10 * DAY + 2 * HOUR;
        let evening = 10 * DAY + 23 * HOUR;
        let desc = garbage(morning, 1024);

        assert!(p.is_coalesceable(&desc, evening));
        assert!(!p.is_coalesceable(&desc, evening + DAY));
    }

    #[test]
    fn short_ttl_coalesces_within_slot() {
        // ttl 6h -> slot width 2h
        let p = policy(DEFAULT_COALESCE_GARBAGE_LIMIT, u64::try_from(6 * HOUR).expect("ttl"));
        let day = 100 * DAY;
        let desc = garbage(day + 4 * HOUR + 10, 1024);

        // same 2h slot (04:00-06:00)
        assert!(p.is_coalesceable(&desc, day + 5 * HOUR));
        // next slot
        assert!(!p.is_coalesceable(&desc, day + 6 * HOUR + 1));
    }

    #[test]
    fn tiny_ttl_disables_coalescing() {
        // ttl of 2 ms -> slot width 0
        let p = policy(DEFAULT_COALESCE_GARBAGE_LIMIT, 2);
        let desc = garbage(1_000, 16);
        assert!(!p.is_coalesceable(&desc, 1_000));
    }

    #[test]
    fn day_boundary_respects_time_zone() {
        let east = FixedOffset::east_opt(5 * 3600).expect("offset");
        let p = GarbagePolicy::new(DEFAULT_COALESCE_GARBAGE_LIMIT, u64::try_from(2 * DAY).expect("ttl"), east);

        // 23:30 UTC is 04:30 the next day at +05:00
        let t = 23 * HOUR + 30 * 60 * 1000;
        let day_start = p.day_start_millis(t);
        // local midnight of that next day is 19:00 UTC
        assert_eq!(day_start, 19 * HOUR);
    }

    #[test]
    fn classification_is_deterministic() {
        let p = policy(DEFAULT_COALESCE_GARBAGE_LIMIT, DEFAULT_GARBAGE_TTL_MILLIS);
        let desc = garbage(3 * HOUR, 1024);
        let now = 5 * HOUR;
        let first = (p.is_expired(&desc, 0, now), p.is_coalesceable(&desc, now));
        let second = (p.is_expired(&desc, 0, now), p.is_coalesceable(&desc, now));
        assert_eq!(first, second);
    }
}
