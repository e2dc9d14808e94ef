//! Lazy reset transition for usage records.
//!
//! Nothing here touches storage: `compute_next_state` takes the stored record
//! and the wall clock and returns what the record should look like, so the
//! ledger only has to persist the difference.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveTime, TimeZone, Utc};

use super::model::{PlanType, UsageRecord};

/// How a plan's reset boundary moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCadence {
    /// Next local midnight
    Daily,
    /// Whole months from the payment anchor, or from the stored boundary when
    /// no payment is known. `account_origin` seeds the very first boundary.
    Monthly {
        payment_anchor: Option<DateTime<Utc>>,
        account_origin: DateTime<Utc>,
    },
}

impl PlanType {
    pub fn cadence(
        &self,
        payment_anchor: Option<DateTime<Utc>>,
        account_origin: DateTime<Utc>,
    ) -> ResetCadence {
        match self {
            PlanType::Basic => ResetCadence::Daily,
            PlanType::Standard | PlanType::Pro => ResetCadence::Monthly {
                payment_anchor,
                account_origin,
            },
            PlanType::Admin => ResetCadence::Monthly {
                payment_anchor: None,
                account_origin,
            },
        }
    }
}

/// Result of applying the transition to a stored record
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub record: UsageRecord,
    /// Usage was zeroed
    pub reset_applied: bool,
    /// Boundary changed without touching usage
    pub boundary_refreshed: bool,
}

impl Transition {
    fn unchanged(record: &UsageRecord) -> Self {
        Self {
            record: record.clone(),
            reset_applied: false,
            boundary_refreshed: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.reset_applied || self.boundary_refreshed
    }
}

pub fn compute_next_state(
    now: DateTime<Utc>,
    record: &UsageRecord,
    cadence: &ResetCadence,
    offset: FixedOffset,
) -> Transition {
    let Some(boundary) = record.next_reset_date else {
        let mut next = record.clone();
        next.next_reset_date = Some(initial_boundary(now, cadence, offset));
        return Transition {
            record: next,
            reset_applied: false,
            boundary_refreshed: true,
        };
    };

    if now > boundary && record.usage_count > 0 {
        let mut next = record.clone();
        next.usage_count = 0;
        next.next_reset_date = Some(boundary_after(now, boundary, cadence, offset));
        return Transition {
            record: next,
            reset_applied: true,
            boundary_refreshed: false,
        };
    }

    if record.usage_count == 0 {
        let authoritative = boundary_after(now, boundary, cadence, offset);
        let stale = now > boundary;
        let anchored = matches!(
            cadence,
            ResetCadence::Monthly {
                payment_anchor: Some(_),
                ..
            }
        );
        if authoritative != boundary && (stale || anchored) {
            let mut next = record.clone();
            next.next_reset_date = Some(authoritative);
            return Transition {
                record: next,
                reset_applied: false,
                boundary_refreshed: true,
            };
        }
    }

    Transition::unchanged(record)
}

fn initial_boundary(now: DateTime<Utc>, cadence: &ResetCadence, offset: FixedOffset) -> DateTime<Utc> {
    match cadence {
        ResetCadence::Daily => next_local_midnight(now, offset),
        ResetCadence::Monthly {
            payment_anchor,
            account_origin,
        } => next_monthly_boundary(payment_anchor.unwrap_or(*account_origin), now),
    }
}

/// Boundary that should follow `now`; `previous` is the anchor of last resort.
fn boundary_after(
    now: DateTime<Utc>,
    previous: DateTime<Utc>,
    cadence: &ResetCadence,
    offset: FixedOffset,
) -> DateTime<Utc> {
    match cadence {
        ResetCadence::Daily => next_local_midnight(now, offset),
        ResetCadence::Monthly {
            payment_anchor: Some(anchor),
            ..
        } => next_monthly_boundary(*anchor, now),
        ResetCadence::Monthly {
            payment_anchor: None,
            ..
        } => {
            if previous > now {
                previous
            } else {
                next_monthly_boundary(previous, now)
            }
        }
    }
}

/// First midnight in `offset` strictly after `now`
pub fn next_local_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    now.with_timezone(&offset)
        .date_naive()
        .succ_opt()
        .and_then(|tomorrow| {
            offset
                .from_local_datetime(&tomorrow.and_time(NaiveTime::MIN))
                .single()
        })
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| now + Duration::days(1))
}

/// Smallest `anchor + k months` (k >= 1) strictly after `now`.
///
/// Months are always added to the original anchor so end-of-month clamping
/// (Jan 31 -> Feb 29) does not carry into later months.
pub fn next_monthly_boundary(anchor: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let elapsed =
        (now.year() - anchor.year()) * 12 + now.month() as i32 - anchor.month() as i32;
    // anchor + (elapsed - 1) months lands in the month before `now`, so start at `elapsed`
    let mut months = elapsed.max(1) as u32;
    loop {
        let candidate = anchor
            .checked_add_months(Months::new(months))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if candidate > now {
            return candidate;
        }
        months += 1;
    }
}
