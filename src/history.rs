use crate::schema::HistoricalReading;
use log::debug;
use std::collections::HashMap;

/// Lookup of past readings by client, built once per batch and shared
/// read-only by every record.
#[derive(Debug, Default)]
pub struct HistoricalIndex<'a> {
    by_client_task: HashMap<&'a str, HashMap<&'a str, Vec<&'a HistoricalReading>>>,
    by_client_date: HashMap<&'a str, HashMap<(i32, u32), &'a HistoricalReading>>,
    len: usize,
}

impl<'a> HistoricalIndex<'a> {
    pub fn new(readings: &'a [HistoricalReading]) -> Self {
        let mut by_client_task: HashMap<&'a str, HashMap<&'a str, Vec<&'a HistoricalReading>>> =
            HashMap::new();
        let mut by_client_date: HashMap<&'a str, HashMap<(i32, u32), &'a HistoricalReading>> =
            HashMap::new();

        for reading in readings {
            let client = reading.client_id.as_str();

            by_client_task
                .entry(client)
                .or_default()
                .entry(reading.task_code.as_str())
                .or_default()
                .push(reading);

            // Duplicate (client, year, month) rows are kept out of this map;
            // the first one seen answers date lookups.
            by_client_date
                .entry(client)
                .or_default()
                .entry((reading.year, reading.month))
                .or_insert(reading);
        }

        for tasks in by_client_task.values_mut() {
            for list in tasks.values_mut() {
                list.sort_by(|a, b| (b.year, b.month).cmp(&(a.year, a.month)));
            }
        }

        debug!(
            "Indexed {} historical readings for {} clients",
            readings.len(),
            by_client_task.len()
        );

        Self {
            by_client_task,
            by_client_date,
            len: readings.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Readings for a client and task code, most recent first.
    pub fn by_client_task(&self, client: &str, task_code: &str) -> &[&'a HistoricalReading] {
        self.by_client_task
            .get(client)
            .and_then(|tasks| tasks.get(task_code))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn by_client_date(&self, client: &str, year: i32, month: u32) -> Option<&'a HistoricalReading> {
        self.by_client_date
            .get(client)
            .and_then(|dates| dates.get(&(year, month)))
            .copied()
    }
}
