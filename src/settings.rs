use crate::error::{AuditError, Result};
use chrono::{Local, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_INVOICE_WINDOW_MONTHS: u32 = 4;
pub const DEFAULT_CONSUMPTION_TOLERANCE: f64 = 0.20;
pub const DEFAULT_AWARE_OPERATOR_CODE: &str = "39";

pub const DEFAULT_CONFIRMATION_KEYWORDS: [&str; 11] = [
    "lectura real",
    "lectura confirmada",
    "lectura",
    "real",
    "confirmada",
    "error",
    "correcta",
    "corrige",
    "periodos anteriores",
    "genera",
    "desviacion",
];

/// Tunables for the validation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ValidationSettings {
    #[schemars(
        description = "Invoices older than this many months before the previous calendar month are rejected outright."
    )]
    pub invoice_window_months: u32,

    #[schemars(
        description = "Relative band around the mean historical consumption inside which a consumption counts as normal (0.2 = +/-20%)."
    )]
    pub consumption_tolerance: f64,

    #[schemars(
        description = "Observation code an operator keys in when they noticed the register looked wrong."
    )]
    pub aware_operator_code: String,

    #[schemars(
        description = "Case-insensitive phrases in historical observations that confirm the operator checked the reading."
    )]
    pub confirmation_keywords: Vec<String>,

    #[schemars(
        description = "Date treated as today by the invoice window check. Defaults to the local date when absent."
    )]
    pub reference_date: Option<NaiveDate>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            invoice_window_months: DEFAULT_INVOICE_WINDOW_MONTHS,
            consumption_tolerance: DEFAULT_CONSUMPTION_TOLERANCE,
            aware_operator_code: DEFAULT_AWARE_OPERATOR_CODE.to_string(),
            confirmation_keywords: DEFAULT_CONFIRMATION_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            reference_date: None,
        }
    }
}

impl ValidationSettings {
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.consumption_tolerance) {
            return Err(AuditError::InvalidTolerance(self.consumption_tolerance));
        }
        if self.aware_operator_code.trim().is_empty() {
            return Err(AuditError::InvalidSettings(
                "aware_operator_code must not be empty".to_string(),
            ));
        }
        if self.confirmation_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(AuditError::InvalidSettings(
                "confirmation_keywords must not contain blank entries".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn json_schema() -> serde_json::Result<String> {
        serde_json::to_string_pretty(&schemars::schema_for!(ValidationSettings))
    }
}
