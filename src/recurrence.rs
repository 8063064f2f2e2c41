use chrono::{Duration, Months, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::enums::FrequencyType;

fn default_interval() -> u32 {
    1
}

/// Recurrence rule stored on a scheduled task. Persisted as JSONB; the
/// engine only ever reads it through this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frequency {
    #[serde(rename = "type")]
    pub frequency_type: FrequencyType,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month_of_year: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_days: Option<Vec<i64>>,
}

impl Frequency {
    pub fn monthly() -> Self {
        Self {
            frequency_type: FrequencyType::Monthly,
            interval: 1,
            day_of_week: None,
            day_of_month: None,
            month_of_year: None,
            end_date: None,
            occurrences: None,
            custom_days: None,
        }
    }
}

/// Compute the next due date after `current` (the later of the stored next
/// due date and the scheduled date). Returns `None` when the schedule has no
/// further occurrences: not recurring, past `end_date`, or the occurrence
/// cap has been spent.
pub fn calculate_next_due_date(
    recurring: bool,
    frequency: Option<&Frequency>,
    current: NaiveDateTime,
    occurrences_spawned: i32,
) -> Option<NaiveDateTime> {
    if !recurring {
        return None;
    }
    let frequency = frequency?;

    if let Some(cap) = frequency.occurrences {
        if occurrences_spawned >= cap as i32 {
            return None;
        }
    }

    let interval = frequency.interval.max(1);
    let next = match frequency.frequency_type {
        FrequencyType::Daily => current.checked_add_signed(Duration::days(interval as i64))?,
        FrequencyType::Weekly => current.checked_add_signed(Duration::days(7 * interval as i64))?,
        FrequencyType::BiWeekly => {
            current.checked_add_signed(Duration::days(14 * interval as i64))?
        }
        FrequencyType::Monthly => current.checked_add_months(Months::new(interval))?,
        FrequencyType::Quarterly => current.checked_add_months(Months::new(3 * interval))?,
        FrequencyType::Yearly => current.checked_add_months(Months::new(12 * interval))?,
        FrequencyType::CustomDays => {
            let offsets = frequency.custom_days.as_deref().filter(|d| !d.is_empty())?;
            // Cycle through the configured offsets, one per spawn.
            let index = (occurrences_spawned.max(0) as usize) % offsets.len();
            current.checked_add_signed(Duration::days(offsets[index]))?
        }
    };

    if let Some(end_date) = frequency.end_date {
        if next > end_date {
            return None;
        }
    }

    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn monthly_until(end: NaiveDateTime) -> Frequency {
        Frequency {
            end_date: Some(end),
            ..Frequency::monthly()
        }
    }

    #[test]
    fn monthly_advances_one_calendar_month() {
        let next = calculate_next_due_date(true, Some(&Frequency::monthly()), at(2024, 1, 15), 0);
        assert_eq!(next, Some(at(2024, 2, 15)));
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let next = calculate_next_due_date(true, Some(&Frequency::monthly()), at(2024, 1, 31), 0);
        assert_eq!(next, Some(at(2024, 2, 29)));
    }

    #[test]
    fn end_date_stops_the_series() {
        let freq = monthly_until(at(2024, 4, 30));
        assert_eq!(
            calculate_next_due_date(true, Some(&freq), at(2024, 3, 15), 2),
            Some(at(2024, 4, 15))
        );
        assert_eq!(
            calculate_next_due_date(true, Some(&freq), at(2024, 4, 15), 3),
            None
        );
    }

    #[test]
    fn occurrence_cap_is_enforced() {
        let freq = Frequency {
            occurrences: Some(3),
            ..Frequency::monthly()
        };
        assert!(calculate_next_due_date(true, Some(&freq), at(2024, 1, 15), 2).is_some());
        assert_eq!(
            calculate_next_due_date(true, Some(&freq), at(2024, 1, 15), 3),
            None
        );
    }

    #[test]
    fn bi_weekly_respects_interval() {
        let freq = Frequency {
            frequency_type: FrequencyType::BiWeekly,
            interval: 2,
            ..Frequency::monthly()
        };
        let next = calculate_next_due_date(true, Some(&freq), at(2024, 1, 1), 0);
        assert_eq!(next, Some(at(2024, 1, 29)));
    }

    #[test]
    fn custom_days_cycles_through_offsets() {
        let freq = Frequency {
            frequency_type: FrequencyType::CustomDays,
            custom_days: Some(vec![10, 20]),
            ..Frequency::monthly()
        };
        assert_eq!(
            calculate_next_due_date(true, Some(&freq), at(2024, 1, 1), 0),
            Some(at(2024, 1, 11))
        );
        assert_eq!(
            calculate_next_due_date(true, Some(&freq), at(2024, 1, 11), 1),
            Some(at(2024, 1, 31))
        );
    }

    #[test]
    fn non_recurring_has_no_next() {
        assert_eq!(
            calculate_next_due_date(false, Some(&Frequency::monthly()), at(2024, 1, 15), 0),
            None
        );
        assert_eq!(calculate_next_due_date(true, None, at(2024, 1, 15), 0), None);
    }
}
