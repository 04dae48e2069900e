//! Per-month totals over a set of activities.

use chrono::Datelike;
use serde::Serialize;

use crate::types::PendingActivity;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthSummary {
    /// `MM/YYYY`.
    pub month: String,
    pub total_activities: usize,
    /// Kilometres, rounded to two decimals.
    pub total_distance: f64,
    /// Seconds.
    pub total_time: u64,
}

/// Groups activities by the month they occurred in, in order of first
/// appearance.
pub fn summarize_by_month(activities: &[PendingActivity]) -> Vec<MonthSummary> {
    let mut months: Vec<(String, usize, f64, u64)> = Vec::new();

    for activity in activities {
        let key = format!(
            "{:02}/{}",
            activity.occurred_at.month(),
            activity.occurred_at.year()
        );
        match months.iter_mut().find(|(month, ..)| *month == key) {
            Some((_, count, distance, time)) => {
                *count += 1;
                *distance += activity.distance_km;
                *time += activity.duration_sec;
            }
            None => months.push((key, 1, activity.distance_km, activity.duration_sec)),
        }
    }

    months
        .into_iter()
        .map(|(month, count, distance, time)| MonthSummary {
            month,
            total_activities: count,
            total_distance: (distance * 100.0).round() / 100.0,
            total_time: time,
        })
        .collect()
}
