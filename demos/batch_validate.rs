use anyhow::{Context, Result};
use dotenv::dotenv;
use meter_reading_auditor::ingestion::load_inputs;
use meter_reading_auditor::{EnrichedRecord, ReadingAuditor, ValidationSettings, ValidationSummary};
use std::env;
use std::path::{Path, PathBuf};

/// Environment:
/// - `BUNDLE_PATH` (required): consultation bundle JSON
/// - `ROSTER_PATH`: employee roster JSON
/// - `SETTINGS_PATH`: validation settings JSON
/// - `REFERENCE_DATE`: YYYY-MM-DD used as today, overrides the settings file
/// - `EXTENDED_RULES`: any value turns on the extended rule set
/// - `OUTPUT_PATH` / `CSV_PATH`: where to write results
fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let bundle_path = env::var("BUNDLE_PATH").context("BUNDLE_PATH must be set")?;
    let roster_path = env::var("ROSTER_PATH").ok().map(PathBuf::from);
    let output_path = env::var("OUTPUT_PATH").unwrap_or_else(|_| "lecturas_validadas.json".into());
    let csv_path = env::var("CSV_PATH").unwrap_or_else(|_| "lecturas_validadas.csv".into());

    let mut settings = match env::var("SETTINGS_PATH") {
        Ok(path) => ValidationSettings::from_file(&path)
            .with_context(|| format!("reading settings from {}", path))?,
        Err(_) => ValidationSettings::default(),
    };
    if let Ok(raw) = env::var("REFERENCE_DATE") {
        let date = chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .with_context(|| format!("REFERENCE_DATE {:?} is not YYYY-MM-DD", raw))?;
        settings = settings.with_reference_date(date);
    }

    println!("🔎 Meter reading audit");
    println!("═══════════════════════════════════════════════════════════════\n");

    let inputs = load_inputs(&bundle_path, roster_path.as_deref())
        .with_context(|| format!("loading bundle {}", bundle_path))?;
    println!(
        "   Loaded {} readings, {} historical readings, {} employees",
        inputs.raw_readings.len(),
        inputs.historical_readings.len(),
        inputs.employee_roster.len()
    );

    let auditor = if env::var("EXTENDED_RULES").is_ok() {
        ReadingAuditor::extended(settings)?
    } else {
        ReadingAuditor::new(settings)?
    };
    println!("   Rules: {}\n", auditor.pipeline().rule_names().join(" → "));

    let records = auditor.process(&inputs);

    std::fs::write(&output_path, serde_json::to_string_pretty(&records)?)
        .with_context(|| format!("writing {}", output_path))?;
    println!("   ✅ Validated records written to {}", output_path);

    export_to_csv(&records, Path::new(&csv_path))?;
    println!("   ✅ CSV summary written to {}\n", csv_path);

    let summary = ValidationSummary::from_records(&records);
    summary.log();

    println!("═══════════════════════════════════════════════════════════════");
    println!(
        "   {} records: {} SI, {} NO, {} PENDIENTE",
        summary.total,
        summary.confirmed(),
        summary.rejected(),
        summary.pending()
    );
    for (reason, count) in &summary.by_justification {
        println!("   {:>6}  {}", count, reason);
    }
    if !summary.by_error_location.is_empty() {
        println!("\n   Error locations:");
        for (location, count) in &summary.by_error_location {
            println!("   {:>6}  {}", count, location);
        }
    }

    Ok(())
}

fn export_to_csv(records: &[EnrichedRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "USUARIO",
        "FECHALECTURA",
        "LECTURATOMADA",
        "LECTURAFACTURADA",
        "Lectura_1",
        "Lectura_2",
        "Lectura_3",
        "Lectura_4",
        "Lectura_5",
        "Lectura_6",
        "Operario",
        "cedula",
        "medidor",
        "marcamedidor",
        "Validacion",
        "obsValidacion",
        "UbicacionError",
    ])?;

    for record in records {
        let raw = &record.reading;
        let mut row = vec![
            raw.client_id.clone(),
            raw.reading_date.clone().unwrap_or_default(),
            raw.taken.as_ref().map(|m| m.to_text()).unwrap_or_default(),
            raw.billed.as_ref().map(|m| m.to_text()).unwrap_or_default(),
        ];
        row.extend(
            record
                .history
                .values()
                .iter()
                .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
        );
        row.extend([
            record.operator_name.clone().unwrap_or_default(),
            record.operator_card.clone().unwrap_or_default(),
            record.meter_number.clone().unwrap_or_default(),
            record.meter_brand.clone().unwrap_or_default(),
            record.validation.label().unwrap_or_default().to_string(),
            record.validation.justification().unwrap_or_default().to_string(),
            record.error_location.clone().unwrap_or_default(),
        ]);
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}
