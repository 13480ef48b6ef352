//! Loads the consultation bundle (`{ data, registros, medidores, medidores_db }`)
//! and the employee roster into [`AuditInputs`].

use crate::error::{AuditError, Result};
use crate::schema::lenient::value_to_text;
use crate::schema::{AuditInputs, EmployeeInfo, HistoricalReading, MeterRow, RawReading};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// The consultation bundle as exported by the data-gathering step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsultationBundle {
    /// Rows that cannot be read as a reading are skipped with a warning.
    #[serde(default, deserialize_with = "readable_readings")]
    pub data: Vec<RawReading>,

    /// Either a flat array of historical readings or an object grouping
    /// arrays of them per client.
    #[serde(default)]
    pub registros: Value,

    #[serde(default)]
    pub medidores: BTreeMap<String, Value>,

    /// A `null` client entry counts as no rows.
    #[serde(default, deserialize_with = "readable_meter_rows")]
    pub medidores_db: BTreeMap<String, Vec<MeterRow>>,
}

impl ConsultationBundle {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Fails only on a structural violation: a `registros` value that is not
    /// an array, an object of arrays, or null. Unreadable rows are skipped.
    pub fn historical_readings(&self) -> Result<Vec<HistoricalReading>> {
        let rows: Vec<&Value> = match &self.registros {
            Value::Null => Vec::new(),
            Value::Array(items) => items.iter().collect(),
            Value::Object(groups) => {
                let mut rows = Vec::new();
                for (client, group) in groups {
                    match group {
                        Value::Array(items) => rows.extend(items.iter()),
                        other => {
                            return Err(AuditError::MalformedBundle(format!(
                                "registros[{}] must be an array, found {}",
                                client,
                                json_kind(other)
                            )))
                        }
                    }
                }
                rows
            }
            other => {
                return Err(AuditError::MalformedBundle(format!(
                    "registros must be an array or an object of arrays, found {}",
                    json_kind(other)
                )))
            }
        };

        Ok(keep_readable(rows, "historical reading"))
    }

    /// Client to meter number. Non-scalar entries are skipped with a warning.
    pub fn meter_map(&self) -> BTreeMap<String, String> {
        self.medidores
            .iter()
            .filter_map(|(client, value)| match value_to_text(value.clone()) {
                Some(number) => Some((client.trim().to_string(), number.trim().to_string())),
                None => {
                    if !value.is_null() {
                        warn!(
                            "Skipping meter entry for client {}: expected a scalar, found {}",
                            client,
                            json_kind(value)
                        );
                    }
                    None
                }
            })
            .filter(|(_, number)| !number.is_empty())
            .collect()
    }

    pub fn into_inputs(self, employee_roster: Vec<EmployeeInfo>) -> Result<AuditInputs> {
        let historical_readings = self.historical_readings()?;
        let meter_map = self.meter_map();

        info!(
            "Bundle loaded: {} readings, {} historical readings, {} mapped meters, {} clients with meter rows, {} employees",
            self.data.len(),
            historical_readings.len(),
            meter_map.len(),
            self.medidores_db.len(),
            employee_roster.len()
        );

        Ok(AuditInputs {
            raw_readings: self.data,
            historical_readings,
            meter_map,
            meter_db_rows: self.medidores_db,
            employee_roster,
        })
    }
}

pub fn load_roster(path: impl AsRef<Path>) -> Result<Vec<EmployeeInfo>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Reads the bundle and, when given, the roster file.
pub fn load_inputs(bundle: impl AsRef<Path>, roster: Option<&Path>) -> Result<AuditInputs> {
    let employees = match roster {
        Some(path) => load_roster(path)?,
        None => Vec::new(),
    };
    ConsultationBundle::from_file(bundle)?.into_inputs(employees)
}

fn keep_readable<'v, T, I>(rows: I, kind: &str) -> Vec<T>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = &'v Value>,
{
    rows.into_iter()
        .enumerate()
        .filter_map(|(idx, row)| match T::deserialize(row) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping unreadable {} #{}: {}", kind, idx, e);
                None
            }
        })
        .collect()
}

fn readable_readings<'de, D>(d: D) -> std::result::Result<Vec<RawReading>, D::Error>
where
    D: Deserializer<'de>,
{
    let rows = Option::<Vec<Value>>::deserialize(d)?.unwrap_or_default();
    Ok(keep_readable(&rows, "reading"))
}

fn readable_meter_rows<'de, D>(
    d: D,
) -> std::result::Result<BTreeMap<String, Vec<MeterRow>>, D::Error>
where
    D: Deserializer<'de>,
{
    let groups = Option::<BTreeMap<String, Value>>::deserialize(d)?.unwrap_or_default();
    Ok(groups
        .into_iter()
        .map(|(client, rows)| {
            let rows = match rows {
                Value::Array(items) => keep_readable(&items, "meter row"),
                Value::Null => Vec::new(),
                other => {
                    warn!(
                        "Ignoring meter rows for client {}: expected an array, found {}",
                        client,
                        json_kind(&other)
                    );
                    Vec::new()
                }
            };
            (client, rows)
        })
        .collect())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
