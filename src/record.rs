use crate::schema::{Measure, RawReading};
use serde::{Deserialize, Serialize};

/// Number of trailing monthly readings attached to every record.
pub const SLOT_COUNT: usize = 6;

pub const LABEL_PENDING: &str = "PENDIENTE";
pub const LABEL_CONFIRMED: &str = "SI";
pub const LABEL_REJECTED: &str = "NO";

/// Verdict on whether a flagged reading error was noticed by the operator.
///
/// Rules only ever move a record out of `Pending`; `Confirmed` and `Rejected`
/// are final.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "ValidationFields", into = "ValidationFields")]
pub enum ValidationState {
    #[default]
    Unset,
    Pending,
    Confirmed(String),
    Rejected(String),
}

impl ValidationState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ValidationState::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ValidationState::Confirmed(_) | ValidationState::Rejected(_)
        )
    }

    pub fn label(&self) -> Option<&'static str> {
        match self {
            ValidationState::Unset => None,
            ValidationState::Pending => Some(LABEL_PENDING),
            ValidationState::Confirmed(_) => Some(LABEL_CONFIRMED),
            ValidationState::Rejected(_) => Some(LABEL_REJECTED),
        }
    }

    pub fn justification(&self) -> Option<&str> {
        match self {
            ValidationState::Unset => None,
            ValidationState::Pending => Some(""),
            ValidationState::Confirmed(reason) | ValidationState::Rejected(reason) => {
                Some(reason)
            }
        }
    }
}

/// `Validacion` / `obsValidacion` as they appear in the output files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ValidationFields {
    #[serde(rename = "Validacion", default)]
    label: Option<String>,

    #[serde(rename = "obsValidacion", default)]
    justification: Option<String>,
}

impl From<ValidationFields> for ValidationState {
    fn from(fields: ValidationFields) -> Self {
        let reason = fields.justification.unwrap_or_default();
        match fields.label.as_deref().map(|l| l.trim().to_uppercase()) {
            Some(label) if label == LABEL_PENDING => ValidationState::Pending,
            Some(label) if label == LABEL_CONFIRMED => ValidationState::Confirmed(reason),
            // "No" is written by older exports of the invoice-window check
            Some(label) if label == LABEL_REJECTED => ValidationState::Rejected(reason),
            _ => ValidationState::Unset,
        }
    }
}

impl From<ValidationState> for ValidationFields {
    fn from(state: ValidationState) -> Self {
        ValidationFields {
            label: state.label().map(str::to_string),
            justification: state.justification().map(str::to_string),
        }
    }
}

/// Location of the first digit at which a taken reading departs from its
/// reference reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitFault {
    /// 1-based, counted from the left of the zero-padded values.
    #[serde(rename = "posicion")]
    pub position: usize,

    #[serde(rename = "desdeDerecha")]
    pub from_right: usize,

    /// Decimal place name, e.g. "centena".
    #[serde(rename = "orden")]
    pub place: String,

    #[serde(rename = "tomada")]
    pub taken_digit: char,

    #[serde(rename = "referencia")]
    pub reference_digit: char,
}

/// The six trailing monthly readings, most recent first. Slot `n` (1-based)
/// holds the reading for the reading month minus `n - 1`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "SlotFields", into = "SlotFields")]
pub struct HistorySlots {
    readings: [Option<Measure>; SLOT_COUNT],
    observations: [Option<String>; SLOT_COUNT],
}

impl HistorySlots {
    pub fn from_values(values: [Option<f64>; SLOT_COUNT]) -> Self {
        let mut slots = HistorySlots::default();
        for (idx, value) in values.into_iter().enumerate() {
            slots.readings[idx] = value.and_then(Measure::from_f64);
        }
        slots
    }

    /// Stores a reading in 1-based `slot`; out-of-range slots are ignored.
    pub fn set(&mut self, slot: usize, value: Option<Measure>, observation: Option<String>) {
        if let Some(idx) = slot.checked_sub(1).filter(|i| *i < SLOT_COUNT) {
            self.readings[idx] = value;
            self.observations[idx] = observation;
        }
    }

    pub fn set_observation(&mut self, slot: usize, observation: Option<String>) {
        if let Some(idx) = slot.checked_sub(1).filter(|i| *i < SLOT_COUNT) {
            self.observations[idx] = observation;
        }
    }

    pub fn reading(&self, slot: usize) -> Option<&Measure> {
        let idx = slot.checked_sub(1)?;
        self.readings.get(idx)?.as_ref()
    }

    pub fn value(&self, slot: usize) -> Option<f64> {
        self.reading(slot).and_then(Measure::numeric)
    }

    pub fn values(&self) -> [Option<f64>; SLOT_COUNT] {
        std::array::from_fn(|idx| self.readings[idx].as_ref().and_then(Measure::numeric))
    }

    pub fn observation(&self, slot: usize) -> Option<&str> {
        let idx = slot.checked_sub(1)?;
        self.observations.get(idx)?.as_deref()
    }

    /// Non-empty observation texts in slot order.
    pub fn observations(&self) -> impl Iterator<Item = &str> {
        self.observations
            .iter()
            .filter_map(|o| o.as_deref())
            .filter(|o| !o.trim().is_empty())
    }

    pub fn readings_mut(&mut self) -> impl Iterator<Item = &mut Measure> {
        self.readings.iter_mut().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.iter().all(Option::is_none) && self.observations.iter().all(Option::is_none)
    }

    /// First 1-based slot whose reading equals `value`.
    pub fn position_of(&self, value: f64) -> Option<usize> {
        self.values()
            .iter()
            .position(|v| *v == Some(value))
            .map(|idx| idx + 1)
    }

    /// First adjacent pair `(n, n + 1)` where the older slot is not strictly
    /// below the newer one. An empty slot reads as zero.
    pub fn sequence_break(&self) -> Option<(usize, usize)> {
        let values = self.values().map(|v| v.unwrap_or(0.0));
        values
            .windows(2)
            .position(|pair| pair[0] <= pair[1])
            .map(|idx| (idx + 1, idx + 2))
    }

    pub fn is_strictly_descending(&self) -> bool {
        self.sequence_break().is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SlotFields {
    #[serde(rename = "Lectura_1", default, deserialize_with = "crate::schema::lenient::opt_measure")]
    lectura_1: Option<Measure>,
    #[serde(rename = "Lectura_2", default, deserialize_with = "crate::schema::lenient::opt_measure")]
    lectura_2: Option<Measure>,
    #[serde(rename = "Lectura_3", default, deserialize_with = "crate::schema::lenient::opt_measure")]
    lectura_3: Option<Measure>,
    #[serde(rename = "Lectura_4", default, deserialize_with = "crate::schema::lenient::opt_measure")]
    lectura_4: Option<Measure>,
    #[serde(rename = "Lectura_5", default, deserialize_with = "crate::schema::lenient::opt_measure")]
    lectura_5: Option<Measure>,
    #[serde(rename = "Lectura_6", default, deserialize_with = "crate::schema::lenient::opt_measure")]
    lectura_6: Option<Measure>,
    #[serde(rename = "Obs_Lectura_1", default)]
    obs_1: Option<String>,
    #[serde(rename = "Obs_Lectura_2", default)]
    obs_2: Option<String>,
    #[serde(rename = "Obs_Lectura_3", default)]
    obs_3: Option<String>,
    #[serde(rename = "Obs_Lectura_4", default)]
    obs_4: Option<String>,
    #[serde(rename = "Obs_Lectura_5", default)]
    obs_5: Option<String>,
    #[serde(rename = "Obs_Lectura_6", default)]
    obs_6: Option<String>,
}

impl From<SlotFields> for HistorySlots {
    fn from(f: SlotFields) -> Self {
        HistorySlots {
            readings: [
                f.lectura_1,
                f.lectura_2,
                f.lectura_3,
                f.lectura_4,
                f.lectura_5,
                f.lectura_6,
            ],
            observations: [f.obs_1, f.obs_2, f.obs_3, f.obs_4, f.obs_5, f.obs_6],
        }
    }
}

impl From<HistorySlots> for SlotFields {
    fn from(slots: HistorySlots) -> Self {
        let [lectura_1, lectura_2, lectura_3, lectura_4, lectura_5, lectura_6] = slots.readings;
        let [obs_1, obs_2, obs_3, obs_4, obs_5, obs_6] = slots.observations;
        SlotFields {
            lectura_1,
            lectura_2,
            lectura_3,
            lectura_4,
            lectura_5,
            lectura_6,
            obs_1,
            obs_2,
            obs_3,
            obs_4,
            obs_5,
            obs_6,
        }
    }
}

/// A raw reading plus the context the validation rules look at.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub reading: RawReading,

    #[serde(flatten)]
    pub history: HistorySlots,

    #[serde(rename = "Operario", default)]
    pub operator_name: Option<String>,

    #[serde(rename = "medidor", default)]
    pub meter_number: Option<String>,

    #[serde(rename = "marcamedidor", default)]
    pub meter_brand: Option<String>,

    #[serde(rename = "tecnologiamedidor", default, skip_serializing_if = "Option::is_none")]
    pub meter_technology: Option<String>,

    #[serde(rename = "tipomedidor", default)]
    pub meter_type: Option<String>,

    #[serde(rename = "cedula", default)]
    pub operator_card: Option<String>,

    #[serde(rename = "tipo", default)]
    pub operator_title: Option<String>,

    #[serde(rename = "sede", default)]
    pub operator_site: Option<String>,

    #[serde(flatten)]
    pub validation: ValidationState,

    #[serde(rename = "UbicacionError", default)]
    pub error_location: Option<String>,

    #[serde(rename = "DigitoError", default)]
    pub digit_error: Option<DigitFault>,
}

impl EnrichedRecord {
    pub fn new(reading: RawReading) -> Self {
        Self {
            reading,
            ..Default::default()
        }
    }

    pub fn taken_value(&self) -> Option<f64> {
        self.reading.taken.as_ref().and_then(Measure::numeric)
    }

    pub fn billed_value(&self) -> Option<f64> {
        self.reading.billed.as_ref().and_then(Measure::numeric)
    }

    /// Records a digit fault; the location label always mirrors its place name.
    pub fn set_digit_fault(&mut self, fault: DigitFault) {
        self.error_location = Some(fault.place.clone());
        self.digit_error = Some(fault);
    }

    pub fn set_error_location(&mut self, label: impl Into<String>) {
        self.error_location = Some(label.into());
        self.digit_error = None;
    }

    pub fn has_error_location(&self) -> bool {
        self.error_location
            .as_deref()
            .is_some_and(|l| !l.trim().is_empty())
    }
}
