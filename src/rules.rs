//! The validation pipeline: an ordered list of rules folded over each
//! [`EnrichedRecord`].
//!
//! Every rule is a total function. A rule that cannot evaluate a record
//! (missing history, unparseable date, non-numeric text) leaves it untouched.
//! Apart from the invoice-window rule, which may reject a pending record, and
//! the error-location rules, which ignore the verdict entirely, rules act only
//! on records still `Pending`. A `Confirmed` or `Rejected` verdict is final.

use crate::consumption::assess_consumption;
use crate::digits::{locate_digit_fault, place_name};
use crate::record::{EnrichedRecord, ValidationState};
use crate::schema::{Measure, VerificationNote};
use crate::settings::ValidationSettings;
use crate::utils::{month_start_before, parse_reading_date};
use chrono::NaiveDate;
use log::{debug, info, warn};

pub const CONFIRMS_ALPHANUMERIC: &str = "Confirma la lectura alfanumérica";
pub const OPERATOR_AWARE: &str = "El operario fue consciente del error";
pub const MISSING_LATER_READING: &str = "falta lectura posterior";
pub const MISSING_EARLIER_READING: &str = "falta lectura anterior";
pub const READING_NOT_FOUND: &str = "Lectura no encontrada";
pub const READING_OUT_OF_RANGE: &str = "Lectura Diferente";
pub const MAGNITUDE_OUT_OF_RANGE: &str = "valor fuera de rango esperado";

/// Reading type whose adjusted kW value carries the faulty magnitude.
pub const ADJUSTED_KW_READING_TYPE: &str = "10";

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, record: &mut EnrichedRecord);
}

// ---------------------------------------------------------------------------
// Invoice window
// ---------------------------------------------------------------------------

/// Rejects invoices issued before the window; every other record leaves this
/// rule as `Pending`. Must run first.
#[derive(Debug, Clone)]
pub struct InvoiceWindowRule {
    window_months: u32,
    floor: Option<NaiveDate>,
}

impl InvoiceWindowRule {
    pub fn new(window_months: u32, today: NaiveDate) -> Self {
        // the window is counted back from the month before the current one
        let floor = month_start_before(today, window_months.saturating_add(1));
        Self {
            window_months,
            floor,
        }
    }

    pub fn from_settings(settings: &ValidationSettings) -> Self {
        Self::new(settings.invoice_window_months, settings.today())
    }

    pub fn floor(&self) -> Option<NaiveDate> {
        self.floor
    }
}

impl ValidationRule for InvoiceWindowRule {
    fn name(&self) -> &'static str {
        "invoice_window"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        if record.validation.is_terminal() {
            return;
        }

        let raw_date = record
            .reading
            .billing_date
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let Some(raw_date) = raw_date {
            match (parse_reading_date(raw_date), self.floor) {
                (Some(billed_on), Some(floor)) if billed_on < floor => {
                    record.validation = ValidationState::Rejected(format!(
                        "Fecha de factura fuera de los {} meses establecidos",
                        self.window_months
                    ));
                    return;
                }
                (None, _) => warn!(
                    "Client {}: unparseable billing date {:?}",
                    record.reading.client_id, raw_date
                ),
                _ => {}
            }
        }

        if record.validation == ValidationState::Unset {
            record.validation = ValidationState::Pending;
        }
    }
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct EnsurePendingRule;

impl ValidationRule for EnsurePendingRule {
    fn name(&self) -> &'static str {
        "ensure_pending"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        if record.validation == ValidationState::Unset {
            record.validation = ValidationState::Pending;
        }
    }
}

/// Verification cells that came back as `"[object Object]"` become an empty
/// structured value.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepairVerificationFieldsRule;

impl ValidationRule for RepairVerificationFieldsRule {
    fn name(&self) -> &'static str {
        "repair_verification_fields"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        for field in [
            &mut record.reading.consolidated_check,
            &mut record.reading.prior_week_check,
        ] {
            if field
                .as_ref()
                .is_some_and(VerificationNote::is_stringified_artifact)
            {
                *field = Some(VerificationNote::empty());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoerceNumericFieldsRule;

impl ValidationRule for CoerceNumericFieldsRule {
    fn name(&self) -> &'static str {
        "coerce_numeric_fields"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        let reading = &mut record.reading;
        for measure in [
            &mut reading.taken,
            &mut reading.billed,
            &mut reading.adjusted_kw,
        ]
        .into_iter()
        .flatten()
        {
            measure.coerce();
        }
        record.history.readings_mut().for_each(Measure::coerce);
    }
}

// ---------------------------------------------------------------------------
// Verdict rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ConsumptionAverageRule {
    tolerance: f64,
}

impl ConsumptionAverageRule {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

impl ValidationRule for ConsumptionAverageRule {
    fn name(&self) -> &'static str {
        "consumption_average"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        if !record.validation.is_pending() {
            return;
        }

        let Some(assessment) = assess_consumption(
            &record.history,
            record.taken_value(),
            record.billed_value(),
            self.tolerance,
        ) else {
            debug!(
                "Client {}: not enough history for a consumption check",
                record.reading.client_id
            );
            return;
        };

        let percent = self.tolerance * 100.0;
        let detail = format!(
            "{} vs promedio {:.2}",
            assessment.consumption, assessment.mean
        );
        record.validation = if assessment.within_band() {
            ValidationState::Rejected(format!(
                "Consumo dentro de rango del {:.0}% ({})",
                percent, detail
            ))
        } else {
            ValidationState::Confirmed(format!(
                "Consumo fuera de rango del {:.0}% ({})",
                percent, detail
            ))
        };
    }
}

/// Confirms when the billed value was written into a historical observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphanumericConfirmationRule;

impl ValidationRule for AlphanumericConfirmationRule {
    fn name(&self) -> &'static str {
        "alphanumeric_confirmation"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        if !record.validation.is_pending() {
            return;
        }
        let Some(billed) = record.reading.billed.as_ref().filter(|b| !b.is_blank()) else {
            return;
        };

        let needle = billed.to_text();
        let needle = needle.trim();
        if record.history.observations().any(|obs| obs.contains(needle)) {
            record.validation = ValidationState::Confirmed(CONFIRMS_ALPHANUMERIC.to_string());
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeywordConfirmationRule {
    keywords: Vec<String>,
}

impl KeywordConfirmationRule {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

impl ValidationRule for KeywordConfirmationRule {
    fn name(&self) -> &'static str {
        "keyword_confirmation"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        if !record.validation.is_pending() {
            return;
        }

        let hit = record.history.observations().find_map(|obs| {
            let lowered = obs.to_lowercase();
            self.keywords
                .iter()
                .find(|k| lowered.contains(k.as_str()))
                .cloned()
        });

        if let Some(keyword) = hit {
            debug!(
                "Client {}: observation keyword {:?}",
                record.reading.client_id, keyword
            );
            record.validation = ValidationState::Confirmed(CONFIRMS_ALPHANUMERIC.to_string());
        }
    }
}

/// A break in the descending history confirms only when the operator keyed
/// the "aware of the error" observation code.
#[derive(Debug, Clone)]
pub struct SequenceIntegrityRule {
    aware_code: String,
}

impl SequenceIntegrityRule {
    pub fn new(aware_code: impl Into<String>) -> Self {
        Self {
            aware_code: aware_code.into().trim().to_string(),
        }
    }
}

impl ValidationRule for SequenceIntegrityRule {
    fn name(&self) -> &'static str {
        "sequence_integrity"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        if !record.validation.is_pending() {
            return;
        }
        let Some((newer, older)) = record.history.sequence_break() else {
            return;
        };

        debug!(
            "Client {}: history breaks between Lectura_{} and Lectura_{}",
            record.reading.client_id, newer, older
        );
        if record.reading.observation_code.as_deref() == Some(self.aware_code.as_str()) {
            record.validation = ValidationState::Confirmed(OPERATOR_AWARE.to_string());
        }
    }
}

/// Confirms on an observation that mixes digits with explanatory text.
/// Observations holding digits alone do not confirm.
#[derive(Debug, Clone, Copy, Default)]
pub struct BareNumberObservationRule;

impl ValidationRule for BareNumberObservationRule {
    fn name(&self) -> &'static str {
        "bare_number_observation"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        if !record.validation.is_pending() {
            return;
        }

        let mut bare_number_seen = false;
        for obs in record.history.observations() {
            if !obs.chars().any(|c| c.is_ascii_digit()) {
                continue;
            }
            if obs.chars().any(|c| c.is_ascii_alphabetic()) {
                record.validation = ValidationState::Confirmed(CONFIRMS_ALPHANUMERIC.to_string());
                return;
            }
            bare_number_seen = true;
        }

        if bare_number_seen {
            debug!(
                "Client {}: numeric-only observation left pending",
                record.reading.client_id
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Error location
// ---------------------------------------------------------------------------

/// Finds the slot holding the taken value and diffs it against the adjacent
/// slot that the surrounding readings vouch for. Runs whatever the verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigitLocationRule;

impl ValidationRule for DigitLocationRule {
    fn name(&self) -> &'static str {
        "digit_location"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        let Some(taken) = record.taken_value() else {
            record.set_error_location(READING_NOT_FOUND);
            return;
        };
        let Some(slot) = record.history.position_of(taken) else {
            record.set_error_location(READING_NOT_FOUND);
            return;
        };

        let values = record.history.values();
        let value = |n: usize| values[n - 1];
        let same = |a: usize, b: usize| value(a).is_some() && value(a) == value(b);

        let reference = match slot {
            1 => {
                record.set_error_location(MISSING_LATER_READING);
                return;
            }
            2 if same(1, 3) => Some(3),
            3 if same(2, 4) => Some(4),
            3 if same(1, 2) => Some(2),
            4 if same(3, 5) => Some(5),
            4 if same(2, 3) => Some(3),
            5 if same(4, 6) => Some(6),
            5 if same(3, 4) => Some(4),
            6 if same(4, 5) => Some(5),
            6 => {
                record.set_error_location(MISSING_EARLIER_READING);
                return;
            }
            _ => None,
        };

        if let Some(fault) = reference
            .and_then(value)
            .and_then(|reference| locate_digit_fault(taken, reference))
        {
            debug!(
                "Client {}: taken reading departs at the {}",
                record.reading.client_id, fault.place
            );
            record.set_digit_fault(fault);
        }
    }
}

/// For reading type "10", the magnitude of the adjusted kW tells which
/// decimal place was wrong.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdjustedKwMagnitudeRule;

impl ValidationRule for AdjustedKwMagnitudeRule {
    fn name(&self) -> &'static str {
        "adjusted_kw_magnitude"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        if record.reading.reading_type.as_deref() != Some(ADJUSTED_KW_READING_TYPE) {
            return;
        }
        let Some(kw) = record
            .reading
            .adjusted_kw
            .as_ref()
            .filter(|m| !(m.is_text() && m.is_blank()))
            .and_then(Measure::numeric)
        else {
            return;
        };

        let digits = (kw.trunc().abs() as u64).to_string().len();
        let label = match digits {
            1..=6 => place_name(digits),
            _ => MAGNITUDE_OUT_OF_RANGE.to_string(),
        };
        record.set_error_location(label);
    }
}

/// Flags a taken value lying outside the span of the other historical
/// readings. Only fills an empty error location.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutOfHistoryRangeRule;

impl ValidationRule for OutOfHistoryRangeRule {
    fn name(&self) -> &'static str {
        "out_of_history_range"
    }

    fn apply(&self, record: &mut EnrichedRecord) {
        if record.has_error_location() {
            return;
        }
        let Some(taken) = record.taken_value() else {
            return;
        };
        let billed = record.billed_value();

        let others: Vec<f64> = record
            .history
            .values()
            .into_iter()
            .flatten()
            .filter(|v| *v != taken && Some(*v) != billed)
            .collect();
        if others.len() < 2 {
            return;
        }

        let min = others.iter().copied().fold(f64::INFINITY, f64::min);
        let max = others.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if taken < min || taken > max {
            record.set_error_location(READING_OUT_OF_RANGE);
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct ValidationPipeline {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl ValidationPipeline {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The canonical rule order.
    pub fn standard(settings: &ValidationSettings) -> Self {
        let mut pipeline = Self::verdict_rules(settings);
        pipeline.rules.push(Box::new(DigitLocationRule));
        pipeline
    }

    /// The canonical order plus the adjusted-kW magnitude rule ahead of the
    /// digit locator and the out-of-range rule at the very end.
    pub fn extended(settings: &ValidationSettings) -> Self {
        Self::verdict_rules(settings)
            .with_rule(AdjustedKwMagnitudeRule)
            .with_rule(DigitLocationRule)
            .with_rule(OutOfHistoryRangeRule)
    }

    fn verdict_rules(settings: &ValidationSettings) -> Self {
        Self::empty()
            .with_rule(InvoiceWindowRule::from_settings(settings))
            .with_rule(EnsurePendingRule)
            .with_rule(RepairVerificationFieldsRule)
            .with_rule(CoerceNumericFieldsRule)
            .with_rule(ConsumptionAverageRule::new(settings.consumption_tolerance))
            .with_rule(AlphanumericConfirmationRule)
            .with_rule(KeywordConfirmationRule::new(&settings.confirmation_keywords))
            .with_rule(SequenceIntegrityRule::new(settings.aware_operator_code.as_str()))
            .with_rule(BareNumberObservationRule)
    }

    pub fn with_rule(mut self, rule: impl ValidationRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn run(&self, record: &mut EnrichedRecord) {
        for rule in &self.rules {
            let before = record.validation.label();
            rule.apply(record);
            let after = record.validation.label();
            if before != after {
                debug!(
                    "Client {}: {} moved {:?} -> {:?}",
                    record.reading.client_id,
                    rule.name(),
                    before,
                    after
                );
            }
        }
    }

    pub fn run_batch(&self, records: &mut [EnrichedRecord]) {
        info!(
            "Validating {} records with {} rules",
            records.len(),
            self.rules.len()
        );

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            records.par_iter_mut().for_each(|record| self.run(record));
        }

        #[cfg(not(feature = "parallel"))]
        records.iter_mut().for_each(|record| self.run(record));

        let pending = records
            .iter()
            .filter(|r| r.validation.is_pending())
            .count();
        info!(
            "Validation finished: {} settled, {} still pending",
            records.len() - pending,
            pending
        );
    }
}

impl std::fmt::Debug for ValidationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationPipeline")
            .field("rules", &self.rule_names())
            .finish()
    }
}
