use crate::record::{EnrichedRecord, LABEL_CONFIRMED, LABEL_PENDING, LABEL_REJECTED};
use crate::schema::lenient::value_to_text;
use crate::utils::parse_reading_date;
use chrono::NaiveDate;
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Bucket for records no rule has looked at yet.
pub const UNSET_BUCKET: &str = "SIN VALIDAR";
pub const UNKNOWN_BRAND_BUCKET: &str = "SIN MARCA";

/// Counts over a validated batch, as shown on the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub by_label: BTreeMap<String, usize>,
    pub by_justification: BTreeMap<String, usize>,
    pub by_meter_brand: BTreeMap<String, usize>,
    pub by_error_location: BTreeMap<String, usize>,
    pub digit_faults: usize,
}

impl ValidationSummary {
    pub fn from_records<'r, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'r EnrichedRecord>,
    {
        let mut summary = Self::default();

        for record in records {
            summary.total += 1;

            let label = record.validation.label().unwrap_or(UNSET_BUCKET);
            *summary.by_label.entry(label.to_string()).or_default() += 1;

            if let Some(reason) = record
                .validation
                .justification()
                .map(str::trim)
                .filter(|r| !r.is_empty())
            {
                *summary.by_justification.entry(reason.to_string()).or_default() += 1;
            }

            let brand = record
                .meter_brand
                .as_deref()
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .unwrap_or(UNKNOWN_BRAND_BUCKET);
            *summary.by_meter_brand.entry(brand.to_string()).or_default() += 1;

            if let Some(location) = record
                .error_location
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
            {
                *summary.by_error_location.entry(location.to_string()).or_default() += 1;
            }

            if record.digit_error.is_some() {
                summary.digit_faults += 1;
            }
        }

        summary
    }

    pub fn count(&self, label: &str) -> usize {
        self.by_label.get(label).copied().unwrap_or(0)
    }

    pub fn confirmed(&self) -> usize {
        self.count(LABEL_CONFIRMED)
    }

    pub fn rejected(&self) -> usize {
        self.count(LABEL_REJECTED)
    }

    pub fn pending(&self) -> usize {
        self.count(LABEL_PENDING)
    }

    pub fn log(&self) {
        info!(
            "{} records: {} confirmed, {} rejected, {} pending, {} with a located digit",
            self.total,
            self.confirmed(),
            self.rejected(),
            self.pending(),
            self.digit_faults
        );
        for (reason, count) in &self.by_justification {
            info!("  {:>6}  {}", count, reason);
        }
    }
}

/// Dashboard filter. Text criteria match as case-insensitive substrings;
/// zone and cycle must match exactly. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RecordFilter {
    pub client: Option<String>,
    pub reading_type: Option<String>,
    pub site: Option<String>,
    pub operator: Option<String>,
    pub meter_type: Option<String>,
    pub meter_brand: Option<String>,
    pub validation: Option<String>,
    pub justification: Option<String>,
    pub error_type: Option<String>,
    pub zone: Option<String>,
    pub cycle: Option<String>,

    #[schemars(description = "Inclusive lower bound on FECHALECTURA")]
    pub read_from: Option<NaiveDate>,

    #[schemars(description = "Inclusive upper bound on FECHALECTURA")]
    pub read_to: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn matches(&self, record: &EnrichedRecord) -> bool {
        let raw = &record.reading;

        contains(Some(raw.client_id.as_str()), &self.client)
            && contains(raw.reading_type.as_deref(), &self.reading_type)
            && contains(record.operator_site.as_deref(), &self.site)
            && contains(record.operator_name.as_deref(), &self.operator)
            && contains(record.meter_type.as_deref(), &self.meter_type)
            && contains(record.meter_brand.as_deref(), &self.meter_brand)
            && contains(record.validation.label(), &self.validation)
            && contains(record.validation.justification(), &self.justification)
            && contains(raw.error_type.as_deref(), &self.error_type)
            && equals(raw.zone.as_ref(), &self.zone)
            && equals(raw.cycle.as_ref(), &self.cycle)
            && self.within_dates(raw.reading_date.as_deref())
    }

    pub fn apply<'r>(&self, records: &'r [EnrichedRecord]) -> Vec<&'r EnrichedRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }

    fn within_dates(&self, reading_date: Option<&str>) -> bool {
        if self.read_from.is_none() && self.read_to.is_none() {
            return true;
        }
        let Some(date) = reading_date.and_then(parse_reading_date) else {
            return false;
        };
        self.read_from.map_or(true, |from| date >= from) && self.read_to.map_or(true, |to| date <= to)
    }
}

fn criterion(needle: &Option<String>) -> Option<&str> {
    needle.as_deref().map(str::trim).filter(|n| !n.is_empty())
}

fn contains(field: Option<&str>, needle: &Option<String>) -> bool {
    match criterion(needle) {
        None => true,
        Some(needle) => field.is_some_and(|f| f.to_lowercase().contains(&needle.to_lowercase())),
    }
}

fn equals(field: Option<&Value>, needle: &Option<String>) -> bool {
    match criterion(needle) {
        None => true,
        Some(needle) => field
            .cloned()
            .and_then(value_to_text)
            .is_some_and(|f| f.trim() == needle),
    }
}
