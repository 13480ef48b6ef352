use crate::history::HistoricalIndex;
use crate::schema::{EmployeeInfo, MeterInfo, MeterRow};
use crate::utils::{normalize_name, parse_reading_date};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use log::debug;
use std::collections::{BTreeMap, HashMap};

/// Picks the row to trust when the meter database holds several for a client:
/// the latest `created_at`, then the highest `id`, then the first row.
pub fn select_preferred_meter(rows: &[MeterRow]) -> Option<&MeterRow> {
    rows.iter().reduce(|best, candidate| {
        let best_key = (created_at_millis(best), best.id.unwrap_or(0));
        let candidate_key = (created_at_millis(candidate), candidate.id.unwrap_or(0));
        if candidate_key > best_key {
            candidate
        } else {
            best
        }
    })
}

fn created_at_millis(row: &MeterRow) -> i64 {
    let Some(raw) = row.created_at.as_deref().map(str::trim) else {
        return 0;
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.timestamp_millis();
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return dt.and_utc().timestamp_millis();
        }
    }
    if let Some(millis) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
    {
        return millis;
    }
    // numeric exports carry epoch milliseconds
    raw.parse::<f64>()
        .ok()
        .filter(|ms| ms.is_finite())
        .map(|ms| ms.trunc() as i64)
        .unwrap_or(0)
}

/// Meter metadata per client, database rows first, plain number map second.
#[derive(Debug, Clone, Default)]
pub struct MeterCatalog {
    preferred: HashMap<String, MeterRow>,
    fallback: HashMap<String, String>,
}

impl MeterCatalog {
    pub fn new(
        meter_map: &BTreeMap<String, String>,
        meter_db_rows: &BTreeMap<String, Vec<MeterRow>>,
    ) -> Self {
        let preferred = meter_db_rows
            .iter()
            .filter_map(|(client, rows)| {
                select_preferred_meter(rows).map(|row| (client.trim().to_string(), row.clone()))
            })
            .collect();

        let fallback = meter_map
            .iter()
            .map(|(client, number)| (client.trim().to_string(), number.trim().to_string()))
            .filter(|(_, number)| !number.is_empty())
            .collect();

        Self {
            preferred,
            fallback,
        }
    }

    pub fn resolve(&self, client: &str) -> Option<MeterInfo> {
        let fallback_number = self.fallback.get(client).cloned();

        match self.preferred.get(client) {
            Some(row) => Some(MeterInfo {
                number: row.num_medidor.clone().or(fallback_number),
                brand: row.marca_medidor.clone(),
                technology: row.tecnologia_medidor.clone(),
                meter_type: row.tipo_medidor.clone(),
            }),
            None => fallback_number.map(|number| MeterInfo {
                number: Some(number),
                ..Default::default()
            }),
        }
    }
}

/// Employee roster indexed by identity card and by normalised name.
#[derive(Debug, Clone, Default)]
pub struct EmployeeRoster {
    by_card: HashMap<String, EmployeeInfo>,
    by_name: HashMap<String, EmployeeInfo>,
}

impl EmployeeRoster {
    pub fn new(employees: &[EmployeeInfo]) -> Self {
        let mut by_card = HashMap::new();
        let mut by_name = HashMap::new();

        for employee in employees {
            if let Some(card) = employee.identity_card.as_deref().filter(|c| !c.is_empty()) {
                by_card
                    .entry(card.to_string())
                    .or_insert_with(|| employee.clone());
            }

            let key = normalize_name(employee.name.as_deref().unwrap_or_default());
            if !key.is_empty() {
                by_name.insert(key, employee.clone());
            }
        }

        Self { by_card, by_name }
    }

    pub fn len(&self) -> usize {
        self.by_card.len().max(self.by_name.len())
    }

    pub fn is_empty(&self) -> bool {
        self.by_card.is_empty() && self.by_name.is_empty()
    }

    pub fn by_identity(&self, card: &str) -> Option<&EmployeeInfo> {
        self.by_card.get(card.trim())
    }

    pub fn by_name(&self, name: &str) -> Option<&EmployeeInfo> {
        let key = normalize_name(name);
        if key.is_empty() {
            return None;
        }
        self.by_name.get(&key)
    }
}

/// Identity card of whoever read this client's meter in the month of
/// `reading_date`. Unparseable dates resolve to `None`.
pub fn resolve_reader_identity(
    client: &str,
    reading_date: Option<&str>,
    index: &HistoricalIndex<'_>,
) -> Option<String> {
    if client.is_empty() {
        return None;
    }
    let date = parse_reading_date(reading_date?)?;
    let hit = index.by_client_date(client, date.year(), date.month())?;
    debug!(
        "Client {}: reader {:?} found for {}/{}",
        client,
        hit.reader_id,
        date.month(),
        date.year()
    );
    hit.reader_id.clone()
}

/// Meter and personnel lookups shared by every record of a batch.
#[derive(Debug, Clone, Default)]
pub struct ReferenceResolver {
    meters: MeterCatalog,
    roster: EmployeeRoster,
}

impl ReferenceResolver {
    pub fn new(meters: MeterCatalog, roster: EmployeeRoster) -> Self {
        Self { meters, roster }
    }

    pub fn resolve_meter(&self, client: &str) -> Option<MeterInfo> {
        self.meters.resolve(client)
    }

    pub fn resolve_reader_identity(
        &self,
        client: &str,
        reading_date: Option<&str>,
        index: &HistoricalIndex<'_>,
    ) -> Option<String> {
        resolve_reader_identity(client, reading_date, index)
    }

    pub fn resolve_operator(&self, identity_card: Option<&str>) -> Option<&EmployeeInfo> {
        self.roster.by_identity(identity_card?)
    }

    pub fn operator_by_name(&self, name: &str) -> Option<&EmployeeInfo> {
        self.roster.by_name(name)
    }
}
