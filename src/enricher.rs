use crate::history::HistoricalIndex;
use crate::record::{EnrichedRecord, HistorySlots, SLOT_COUNT};
use crate::reference::{EmployeeRoster, MeterCatalog, ReferenceResolver};
use crate::schema::{AuditInputs, EmployeeInfo, RawReading};
use crate::settings::ValidationSettings;
use crate::utils::{months_back, parse_reading_date};
use chrono::{Datelike, NaiveDate};
use log::{debug, info};

/// Builds [`EnrichedRecord`]s from raw readings. The index and the reference
/// lookups are built once and only read afterwards, so one enricher can serve
/// a whole batch (in parallel with the `parallel` feature).
pub struct RecordEnricher<'a> {
    index: HistoricalIndex<'a>,
    resolver: ReferenceResolver,
    settings: ValidationSettings,
}

impl<'a> RecordEnricher<'a> {
    pub fn new(
        index: HistoricalIndex<'a>,
        resolver: ReferenceResolver,
        settings: ValidationSettings,
    ) -> Self {
        Self {
            index,
            resolver,
            settings,
        }
    }

    pub fn from_inputs(inputs: &'a AuditInputs, settings: ValidationSettings) -> Self {
        let index = HistoricalIndex::new(&inputs.historical_readings);
        let resolver = ReferenceResolver::new(
            MeterCatalog::new(&inputs.meter_map, &inputs.meter_db_rows),
            EmployeeRoster::new(&inputs.employee_roster),
        );
        Self::new(index, resolver, settings)
    }

    pub fn index(&self) -> &HistoricalIndex<'a> {
        &self.index
    }

    /// Never fails: every lookup miss leaves the matching field empty.
    pub fn enrich(&self, raw: &RawReading) -> EnrichedRecord {
        let mut record = EnrichedRecord::new(raw.clone());

        if let Some(meter) = self.resolver.resolve_meter(&raw.client_id) {
            record.meter_number = meter.number;
            record.meter_brand = meter.brand;
            record.meter_technology = meter.technology;
            record.meter_type = meter.meter_type;
        }

        self.attach_operator(&mut record);
        record.history = self.build_slots(raw);
        record
    }

    pub fn enrich_all(&self, raws: &[RawReading]) -> Vec<EnrichedRecord> {
        info!(
            "Enriching {} readings against {} historical readings",
            raws.len(),
            self.index.len()
        );

        #[cfg(feature = "parallel")]
        let records: Vec<EnrichedRecord> = {
            use rayon::prelude::*;
            raws.par_iter().map(|raw| self.enrich(raw)).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let records: Vec<EnrichedRecord> = raws.iter().map(|raw| self.enrich(raw)).collect();

        records
    }

    /// Six trailing monthly readings for the client and reading type, slot 1
    /// being the month of the reading date.
    pub fn build_slots(&self, raw: &RawReading) -> HistorySlots {
        let mut slots = HistorySlots::default();

        let Some(task) = raw.reading_type.as_deref() else {
            return slots;
        };
        let candidates = self.index.by_client_task(&raw.client_id, task);
        if candidates.is_empty() {
            debug!(
                "Client {}: no history for reading type {}",
                raw.client_id, task
            );
            return slots;
        }

        let anchor = self.anchor_month(raw);
        for back in 0..SLOT_COUNT {
            let (year, month) = months_back(anchor.year(), anchor.month(), back as u32);
            if let Some(hit) = candidates
                .iter()
                .find(|r| r.year == year && r.month == month)
            {
                slots.set(back + 1, hit.value.clone(), hit.observation.clone());
            }
        }

        slots
    }

    fn anchor_month(&self, raw: &RawReading) -> NaiveDate {
        match raw.reading_date.as_deref().and_then(parse_reading_date) {
            Some(date) => date,
            None => {
                let today = self.settings.today();
                debug!(
                    "Client {}: reading date {:?} unusable, anchoring slots on {}",
                    raw.client_id, raw.reading_date, today
                );
                today
            }
        }
    }

    /// Operator by the reader recorded in history for the reading month,
    /// otherwise by the name written in the clarifications field.
    fn attach_operator(&self, record: &mut EnrichedRecord) {
        let raw = &record.reading;
        let reader_id = self.resolver.resolve_reader_identity(
            &raw.client_id,
            raw.reading_date.as_deref(),
            &self.index,
        );
        let by_card = self.resolver.resolve_operator(reader_id.as_deref());

        let clarified = raw
            .clarifications
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let by_name = clarified.and_then(|name| self.resolver.operator_by_name(name));

        let name = by_card
            .and_then(|e| e.name.clone())
            .or_else(|| clarified.map(str::to_string))
            .or_else(|| by_name.and_then(|e| e.name.clone()));
        let title = first_known(by_card, by_name, |e| e.job_title.as_ref());
        let site = first_known(by_card, by_name, |e| e.site.as_ref());
        let card = reader_id.or_else(|| by_name.and_then(|e| e.identity_card.clone()));

        record.operator_name = name;
        record.operator_card = card;
        record.operator_title = title;
        record.operator_site = site;
    }
}

fn first_known(
    primary: Option<&EmployeeInfo>,
    secondary: Option<&EmployeeInfo>,
    field: impl Fn(&EmployeeInfo) -> Option<&String>,
) -> Option<String> {
    primary
        .and_then(|e| field(e).cloned())
        .or_else(|| secondary.and_then(|e| field(e).cloned()))
}
