use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Text left behind when a structured verification cell was stringified by a
/// spreadsheet round-trip.
pub const STRINGIFIED_OBJECT: &str = "[object Object]";

/// A capture field that should hold a number but may arrive as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Measure {
    Number(#[schemars(with = "f64")] Number),
    Text(String),
}

impl Measure {
    pub fn from_f64(value: f64) -> Option<Self> {
        Number::from_f64(value).map(Measure::Number)
    }

    /// Numeric value, reading numeric-looking text too. Blank or non-numeric
    /// text yields `None`.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Measure::Number(n) => n.as_f64(),
            Measure::Text(s) => parse_number(s).and_then(|n| n.as_f64()),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Measure::Text(_))
    }

    /// Turns numeric-looking text into a number; anything else is left alone.
    pub fn coerce(&mut self) {
        if let Measure::Text(s) = self {
            if let Some(n) = parse_number(s) {
                *self = Measure::Number(n);
            }
        }
    }

    /// Whole numbers print without a fractional part, so a billed `4521.0`
    /// reads as `4521`.
    pub fn to_text(&self) -> String {
        match self {
            Measure::Number(n) if n.is_f64() => match n.as_f64() {
                Some(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", v as i64),
                _ => n.to_string(),
            },
            Measure::Number(n) => n.to_string(),
            Measure::Text(s) => s.clone(),
        }
    }

    /// Zero, blank and non-finite values count as "nothing captured".
    pub fn is_blank(&self) -> bool {
        match self {
            Measure::Number(n) => n.as_f64().map_or(true, |v| v == 0.0),
            Measure::Text(s) => s.trim().is_empty(),
        }
    }
}

impl From<i64> for Measure {
    fn from(value: i64) -> Self {
        Measure::Number(Number::from(value))
    }
}

fn parse_number(text: &str) -> Option<Number> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Some(Number::from(int));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .and_then(Number::from_f64)
}

/// Free-form verification cell carried through from the capture sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum VerificationNote {
    Structured(Map<String, Value>),
    Text(String),
    Other(Value),
}

impl VerificationNote {
    pub fn empty() -> Self {
        VerificationNote::Structured(Map::new())
    }

    pub fn is_stringified_artifact(&self) -> bool {
        matches!(self, VerificationNote::Text(s) if s.trim() == STRINGIFIED_OBJECT)
    }
}

/// One row of the error report as captured in the field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct RawReading {
    #[serde(rename = "USUARIO", default, deserialize_with = "lenient::trimmed_text")]
    #[schemars(description = "Billing account (client) identifier")]
    pub client_id: String,

    #[serde(rename = "ZONA", default)]
    pub zone: Option<Value>,

    #[serde(rename = "CICLO", default)]
    pub cycle: Option<Value>,

    #[serde(rename = "SOLUCION_CONSUMO", default)]
    pub consumption_solution: Option<Value>,

    #[serde(rename = "FECHALECTURA", default, deserialize_with = "lenient::opt_text")]
    #[schemars(description = "Date of the visit, DD/MM/YYYY")]
    pub reading_date: Option<String>,

    #[serde(rename = "FECHAFACTURA", default, deserialize_with = "lenient::opt_text")]
    #[schemars(description = "Billing date, DD/MM/YYYY")]
    pub billing_date: Option<String>,

    #[serde(rename = "LECTURATOMADA", default, deserialize_with = "lenient::opt_measure")]
    #[schemars(description = "Register value recorded at the visit")]
    pub taken: Option<Measure>,

    #[serde(rename = "OBSERVACIONDELECTURA", default, deserialize_with = "lenient::opt_trimmed_text")]
    #[schemars(description = "Observation code keyed by the operator")]
    pub observation_code: Option<String>,

    #[serde(rename = "TEXTO", default)]
    pub text: Option<Value>,

    #[serde(rename = "LECTURAFACTURADA", default, deserialize_with = "lenient::opt_measure")]
    #[schemars(description = "Register value that was actually invoiced")]
    pub billed: Option<Measure>,

    #[serde(rename = "ACLARACIONES", default, deserialize_with = "lenient::opt_text")]
    pub clarifications: Option<String>,

    #[serde(rename = "TIPOLECTURA", default, deserialize_with = "lenient::opt_trimmed_text")]
    #[schemars(description = "Reading type; matches the task code of historical readings")]
    pub reading_type: Option<String>,

    #[serde(rename = "TIPODEERROR", default, deserialize_with = "lenient::opt_text")]
    pub error_type: Option<String>,

    #[serde(rename = "KWAJUSTADOS", default, deserialize_with = "lenient::opt_measure")]
    pub adjusted_kw: Option<Measure>,

    #[serde(rename = "NUE", default)]
    pub nue: Option<Value>,

    #[serde(rename = "VERIFICACIONC/CONSOLIDADO", default)]
    pub consolidated_check: Option<VerificationNote>,

    #[serde(rename = "VERIFICACIONC/SEMANAANTERIOR", default)]
    pub prior_week_check: Option<VerificationNote>,
}

/// A past register reading for a client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct HistoricalReading {
    #[serde(rename = "cliente", alias = "CLIENTE", default, deserialize_with = "lenient::trimmed_text")]
    pub client_id: String,

    #[serde(rename = "lector", alias = "LECTOR", default, deserialize_with = "lenient::opt_trimmed_text")]
    #[schemars(description = "Identity card of the operator who took this reading")]
    pub reader_id: Option<String>,

    #[serde(rename = "ano", alias = "ANO", default, deserialize_with = "lenient::int_or_zero")]
    pub year: i32,

    #[serde(rename = "mes", alias = "MES", default, deserialize_with = "lenient::int_or_zero")]
    pub month: u32,

    #[serde(rename = "codtarea", alias = "CODTAREA", default, deserialize_with = "lenient::trimmed_text")]
    pub task_code: String,

    #[serde(
        rename = "lectura_actual",
        alias = "LECTURA_ACTUAL",
        alias = "lectura_act",
        alias = "LECTURA_ACT",
        default,
        deserialize_with = "lenient::opt_measure"
    )]
    pub value: Option<Measure>,

    #[serde(rename = "obs_texto", alias = "OBS_TEXTO", default, deserialize_with = "lenient::opt_text")]
    pub observation: Option<String>,
}

/// Meter row as stored in the meter database.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct MeterRow {
    #[serde(default, deserialize_with = "lenient::opt_int")]
    pub id: Option<i64>,

    #[serde(default, deserialize_with = "lenient::opt_trimmed_text")]
    pub num_medidor: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub marca_medidor: Option<String>,

    #[serde(alias = "tecnologia", default, deserialize_with = "lenient::opt_text")]
    pub tecnologia_medidor: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub tipo_medidor: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub created_at: Option<String>,
}

/// Meter attributes resolved for a client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct MeterInfo {
    pub number: Option<String>,
    pub brand: Option<String>,
    pub technology: Option<String>,
    pub meter_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct EmployeeInfo {
    #[serde(rename = "cedula", default, deserialize_with = "lenient::opt_trimmed_text")]
    pub identity_card: Option<String>,

    #[serde(rename = "nombre", default, deserialize_with = "lenient::opt_text")]
    pub name: Option<String>,

    #[serde(rename = "cargo", default, deserialize_with = "lenient::opt_text")]
    pub job_title: Option<String>,

    #[serde(rename = "sede", default, deserialize_with = "lenient::opt_text")]
    pub site: Option<String>,
}

/// Everything the engine consumes, already in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AuditInputs {
    #[schemars(description = "Readings flagged in the error report")]
    pub raw_readings: Vec<RawReading>,

    #[schemars(description = "Past readings for the same clients, any order")]
    pub historical_readings: Vec<HistoricalReading>,

    #[schemars(description = "Fallback client -> meter number map")]
    pub meter_map: BTreeMap<String, String>,

    #[schemars(description = "Meter database rows grouped by client; preferred over meter_map")]
    pub meter_db_rows: BTreeMap<String, Vec<MeterRow>>,

    pub employee_roster: Vec<EmployeeInfo>,
}

impl AuditInputs {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(AuditInputs)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

/// Deserializers for spreadsheet-sourced cells, where ids and codes arrive
/// as either JSON numbers or strings.
pub(crate) mod lenient {
    use super::Measure;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Numbers and text become a [`Measure`]; booleans, arrays and objects
    /// count as no reading.
    pub fn opt_measure<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Measure>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => Some(Measure::Number(n)),
            Some(Value::String(s)) => Some(Measure::Text(s)),
            _ => None,
        })
    }

    pub(crate) fn value_to_text(value: Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.and_then(value_to_text))
    }

    pub fn opt_trimmed_text<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(opt_text(d)?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    pub fn trimmed_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(opt_trimmed_text(d)?.unwrap_or_default())
    }

    pub fn opt_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        })
    }

    pub fn int_or_zero<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<i64> + Default,
    {
        Ok(opt_int(d)?
            .and_then(|v| T::try_from(v).ok())
            .unwrap_or_default())
    }
}
