//! # Meter Reading Auditor
//!
//! A library for deciding whether a flagged utility-meter reading error was
//! actually noticed and justified by the field operator.
//!
//! ## Core Concepts
//!
//! - **Raw readings**: rows of the error report, carried through unchanged
//! - **Enrichment**: each reading gains its six trailing monthly readings, its
//!   meter and the operator who took it
//! - **Validation pipeline**: an ordered list of rules; only records still
//!   `PENDIENTE` are acted upon, and a `SI` / `NO` verdict is final
//! - **Error location**: the decimal place at which a miskeyed reading departs
//!   from the readings around it
//!
//! ## Example
//!
//! ```rust,ignore
//! use meter_reading_auditor::*;
//!
//! let inputs = ingestion::load_inputs("DatosConsulta.json", Some("empleados.json".as_ref()))?;
//! let settings = ValidationSettings::default();
//!
//! let records = audit_readings(&inputs, &settings)?;
//! for record in &records {
//!     println!(
//!         "{}: {:?} {:?}",
//!         record.reading.client_id,
//!         record.validation.label(),
//!         record.error_location
//!     );
//! }
//!
//! ValidationSummary::from_records(&records).log();
//! ```

pub mod consumption;
pub mod digits;
pub mod enricher;
pub mod error;
pub mod history;
pub mod ingestion;
pub mod record;
pub mod reference;
pub mod rules;
pub mod schema;
pub mod settings;
pub mod summary;
pub mod utils;

pub use consumption::{assess_consumption, ConsumptionAssessment};
pub use digits::{locate_digit_fault, place_name};
pub use enricher::RecordEnricher;
pub use error::{AuditError, Result};
pub use history::HistoricalIndex;
pub use ingestion::ConsultationBundle;
pub use record::*;
pub use reference::{
    resolve_reader_identity, select_preferred_meter, EmployeeRoster, MeterCatalog,
    ReferenceResolver,
};
pub use rules::{ValidationPipeline, ValidationRule};
pub use schema::*;
pub use settings::ValidationSettings;
pub use summary::{RecordFilter, ValidationSummary};

use log::{debug, info};

/// Enrichment plus validation with one set of settings.
#[derive(Debug)]
pub struct ReadingAuditor {
    settings: ValidationSettings,
    pipeline: ValidationPipeline,
}

impl ReadingAuditor {
    /// Uses the standard rule order.
    pub fn new(settings: ValidationSettings) -> Result<Self> {
        settings.validate()?;
        let pipeline = ValidationPipeline::standard(&settings);
        Ok(Self { settings, pipeline })
    }

    /// Adds the adjusted-kW magnitude and out-of-range location rules.
    pub fn extended(settings: ValidationSettings) -> Result<Self> {
        settings.validate()?;
        let pipeline = ValidationPipeline::extended(&settings);
        Ok(Self { settings, pipeline })
    }

    pub fn with_pipeline(settings: ValidationSettings, pipeline: ValidationPipeline) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings, pipeline })
    }

    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    pub fn pipeline(&self) -> &ValidationPipeline {
        &self.pipeline
    }

    pub fn enrich(&self, inputs: &AuditInputs) -> Vec<EnrichedRecord> {
        let enricher = RecordEnricher::from_inputs(inputs, self.settings.clone());
        enricher.enrich_all(&inputs.raw_readings)
    }

    /// Runs the pipeline over already enriched records, for instance ones
    /// read back from a previous run.
    pub fn validate(&self, records: &mut [EnrichedRecord]) {
        self.pipeline.run_batch(records);
    }

    pub fn process(&self, inputs: &AuditInputs) -> Vec<EnrichedRecord> {
        info!(
            "Auditing {} readings ({} historical, {} employees)",
            inputs.raw_readings.len(),
            inputs.historical_readings.len(),
            inputs.employee_roster.len()
        );
        debug!("Rule order: {:?}", self.pipeline.rule_names());

        let mut records = self.enrich(inputs);
        self.validate(&mut records);
        records
    }
}

pub fn audit_readings(
    inputs: &AuditInputs,
    settings: &ValidationSettings,
) -> Result<Vec<EnrichedRecord>> {
    Ok(ReadingAuditor::new(settings.clone())?.process(inputs))
}
