use chrono::NaiveDate;
use meter_reading_auditor::rules::{
    AlphanumericConfirmationRule, CoerceNumericFieldsRule, EnsurePendingRule,
    InvoiceWindowRule, OPERATOR_AWARE, READING_NOT_FOUND,
};
use meter_reading_auditor::*;
use proptest::prelude::*;

const BUNDLE: &str = r#"{
    "data": [
        {
            "USUARIO": 123,
            "ZONA": 3,
            "CICLO": "12",
            "FECHALECTURA": "10/01/2025",
            "FECHAFACTURA": "15/01/2025",
            "LECTURATOMADA": "80",
            "LECTURAFACTURADA": 0,
            "TIPOLECTURA": "10",
            "OBSERVACIONDELECTURA": "",
            "VERIFICACIONC/CONSOLIDADO": "[object Object]"
        },
        {
            "USUARIO": "456",
            "FECHALECTURA": "12/01/2025",
            "FECHAFACTURA": "20/01/2025",
            "LECTURATOMADA": 1245,
            "TIPOLECTURA": 10,
            "OBSERVACIONDELECTURA": 39,
            "ACLARACIONES": "Ana  Gomez"
        },
        {
            "USUARIO": "789",
            "FECHAFACTURA": "02/07/2024",
            "LECTURATOMADA": 500,
            "TIPOLECTURA": "10"
        }
    ],
    "registros": {
        "123": [
            {"cliente": "123", "lector": "1090", "ano": 2025, "mes": 1, "codtarea": "10", "lectura_actual": 100},
            {"cliente": "123", "lector": "1090", "ano": 2024, "mes": 12, "codtarea": "10", "lectura_actual": 90},
            {"cliente": "123", "lector": "1090", "ano": 2024, "mes": 11, "codtarea": "10", "lectura_actual": 80},
            {"cliente": "123", "lector": "1090", "ano": 2024, "mes": 10, "codtarea": "10", "lectura_actual": 70},
            {"cliente": "123", "lector": "1090", "ano": 2024, "mes": 9, "codtarea": "10", "lectura_actual": 60},
            {"cliente": "123", "lector": "1090", "ano": 2024, "mes": 8, "codtarea": "10", "lectura_actual": 50}
        ],
        "456": [
            {"CLIENTE": "456", "ANO": "2025", "MES": "1", "CODTAREA": 10, "LECTURA_ACT": 1345},
            {"CLIENTE": "456", "ANO": "2024", "MES": "12", "CODTAREA": 10, "LECTURA_ACT": 1245},
            {"CLIENTE": "456", "ANO": "2024", "MES": "11", "CODTAREA": 10, "LECTURA_ACT": 1345},
            {"CLIENTE": "456", "ANO": "2024", "MES": "10", "CODTAREA": 10, "LECTURA_ACT": 1200}
        ]
    },
    "medidores": {"123": "MED-123"},
    "medidores_db": {
        "123": [
            {"id": 1, "num_medidor": "OLD-123", "marca_medidor": "ISKRA", "created_at": "2020-01-01"},
            {"id": 2, "num_medidor": "NEW-123", "marca_medidor": "ELSTER", "created_at": "2023-06-01"}
        ]
    }
}"#;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 2, 10).unwrap()
}

fn settings() -> ValidationSettings {
    ValidationSettings::default().with_reference_date(reference_date())
}

fn roster() -> Vec<EmployeeInfo> {
    vec![
        EmployeeInfo {
            identity_card: Some("1090".to_string()),
            name: Some("JOSE PEREZ".to_string()),
            job_title: Some("LECTOR".to_string()),
            site: Some("CUCUTA".to_string()),
        },
        EmployeeInfo {
            identity_card: Some("2080".to_string()),
            name: Some("ANA GÓMEZ".to_string()),
            job_title: Some("LECTOR".to_string()),
            site: Some("OCAÑA".to_string()),
        },
    ]
}

fn bundle_inputs() -> AuditInputs {
    ConsultationBundle::from_json_str(BUNDLE)
        .unwrap()
        .into_inputs(roster())
        .unwrap()
}

fn history(client: &str, year: i32, month: u32, value: i64) -> HistoricalReading {
    HistoricalReading {
        client_id: client.to_string(),
        reader_id: None,
        year,
        month,
        task_code: "10".to_string(),
        value: Some(Measure::from(value)),
        observation: None,
    }
}

/// Six monthly readings, most recent first, ending at February 2025.
fn trailing_history(client: &str, values: [i64; 6]) -> Vec<HistoricalReading> {
    let months = [
        (2025, 2),
        (2025, 1),
        (2024, 12),
        (2024, 11),
        (2024, 10),
        (2024, 9),
    ];
    months
        .iter()
        .zip(values)
        .map(|(&(year, month), value)| history(client, year, month, value))
        .collect()
}

fn scenario_reading(taken: i64) -> RawReading {
    RawReading {
        client_id: "123".to_string(),
        billing_date: Some("15/01/2025".to_string()),
        taken: Some(Measure::from(taken)),
        reading_type: Some("10".to_string()),
        ..Default::default()
    }
}

#[test]
fn test_end_to_end_scenario() {
    init_logging();

    // no reading date: slots anchor on the reference date
    let inputs = AuditInputs {
        raw_readings: vec![scenario_reading(80)],
        historical_readings: trailing_history("123", [100, 90, 80, 70, 60, 50]),
        ..Default::default()
    };
    let records = audit_readings(&inputs, &settings()).unwrap();
    let record = &records[0];

    assert_eq!(
        record.history.values(),
        [
            Some(100.0),
            Some(90.0),
            Some(80.0),
            Some(70.0),
            Some(60.0),
            Some(50.0)
        ]
    );
    assert_eq!(record.validation.label(), Some("NO"));
    assert!(record
        .validation
        .justification()
        .is_some_and(|j| j.contains("dentro de rango")));

    // slot 3 has no neighbour pair vouching for a reference reading
    assert_eq!(record.error_location, None);
    assert_eq!(record.digit_error, None);

    let json = serde_json::to_value(record).unwrap();
    assert_eq!(json["Validacion"], "NO");
    assert_eq!(json["Lectura_3"], 80);
}

#[test]
fn test_consumption_out_of_range_confirms() {
    let inputs = AuditInputs {
        raw_readings: vec![scenario_reading(80)],
        historical_readings: trailing_history("123", [100, 90, 80, 30, 20, 10]),
        ..Default::default()
    };
    let records = audit_readings(&inputs, &settings()).unwrap();

    assert_eq!(records[0].validation.label(), Some("SI"));
    assert!(records[0]
        .validation
        .justification()
        .is_some_and(|j| j.contains("fuera de rango") && j.contains("50")));
}

#[test]
fn test_invoice_window_takes_precedence() {
    let mut reading = scenario_reading(95);
    reading.billing_date = Some("30/06/2024".to_string());
    reading.observation_code = Some("39".to_string());

    let mut historical = trailing_history("123", [100, 90, 95, 70, 60, 50]);
    historical[0].observation = Some("lectura real 95".to_string());

    let inputs = AuditInputs {
        raw_readings: vec![reading],
        historical_readings: historical,
        ..Default::default()
    };
    let auditor = ReadingAuditor::extended(settings()).unwrap();
    let records = auditor.process(&inputs);

    // keyword, sequence and bare-number rules would all confirm otherwise
    assert_eq!(records[0].validation.label(), Some("NO"));
    assert!(records[0]
        .validation
        .justification()
        .is_some_and(|j| j.contains("4 meses")));
}

#[test]
fn test_sequence_break_with_aware_operator() {
    // 85 is not on record, so the consumption check has nothing to say
    let mut reading = scenario_reading(85);
    reading.observation_code = Some("39".to_string());

    let inputs = AuditInputs {
        raw_readings: vec![reading.clone()],
        historical_readings: trailing_history("123", [100, 90, 95, 70, 60, 50]),
        ..Default::default()
    };
    let records = audit_readings(&inputs, &settings()).unwrap();
    assert_eq!(
        records[0].validation,
        ValidationState::Confirmed(OPERATOR_AWARE.to_string())
    );

    // without the sentinel code the break alone settles nothing
    reading.observation_code = Some("12".to_string());
    let inputs = AuditInputs {
        raw_readings: vec![reading],
        ..inputs
    };
    let records = audit_readings(&inputs, &settings()).unwrap();
    assert_eq!(records[0].validation, ValidationState::Pending);
}

#[test]
fn test_digit_locator_through_pipeline() {
    let fault = locate_digit_fault(12345.0, 12445.0).unwrap();
    assert_eq!(fault.position, 3);
    assert_eq!(fault.from_right, 3);
    assert_eq!(fault.place, "centena");
    assert_eq!((fault.taken_digit, fault.reference_digit), ('3', '4'));

    // 12345 sits in slot 3 between two equal readings, so slot 4 is the reference
    let inputs = AuditInputs {
        raw_readings: vec![scenario_reading(12345)],
        historical_readings: trailing_history("123", [13000, 12445, 12345, 12445, 12000, 11000]),
        ..Default::default()
    };
    let records = audit_readings(&inputs, &settings()).unwrap();
    let record = &records[0];

    assert_eq!(record.error_location.as_deref(), Some("centena"));
    assert_eq!(record.digit_error, Some(fault));
}

#[test]
fn test_bundle_ingestion_and_audit() {
    init_logging();

    let inputs = bundle_inputs();
    assert_eq!(inputs.raw_readings.len(), 3);
    assert_eq!(inputs.historical_readings.len(), 10);

    let auditor = ReadingAuditor::new(settings()).unwrap();
    let records = auditor.process(&inputs);
    assert_eq!(records.len(), 3);

    let first = &records[0];
    assert_eq!(first.reading.client_id, "123");
    assert_eq!(first.meter_number.as_deref(), Some("NEW-123"));
    assert_eq!(first.meter_brand.as_deref(), Some("ELSTER"));
    assert_eq!(first.operator_name.as_deref(), Some("JOSE PEREZ"));
    assert_eq!(first.operator_site.as_deref(), Some("CUCUTA"));
    assert_eq!(first.reading.taken, Some(Measure::from(80)));
    assert_eq!(
        first.reading.consolidated_check,
        Some(VerificationNote::empty())
    );
    assert_eq!(first.validation.label(), Some("NO"));

    // 1245 sits in slot 2, bracketed by two readings of 1345
    let second = &records[1];
    assert_eq!(second.operator_card.as_deref(), Some("2080"));
    assert_eq!(second.operator_name.as_deref(), Some("Ana  Gomez"));
    assert_eq!(second.validation.label(), Some("SI"));
    assert_eq!(second.error_location.as_deref(), Some("centena"));

    let third = &records[2];
    assert_eq!(third.validation.label(), Some("NO"));
    assert_eq!(third.error_location.as_deref(), Some(READING_NOT_FOUND));
    assert!(third.history.is_empty());
}

#[test]
fn test_summary_and_filter_over_batch() {
    let records = ReadingAuditor::new(settings())
        .unwrap()
        .process(&bundle_inputs());

    let summary = ValidationSummary::from_records(&records);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.rejected(), 2);
    assert_eq!(summary.confirmed(), 1);
    assert_eq!(summary.by_meter_brand.get("ELSTER"), Some(&1));
    assert_eq!(summary.digit_faults, 1);

    let filter = RecordFilter {
        zone: Some("3".to_string()),
        validation: Some("no".to_string()),
        ..Default::default()
    };
    let hits = filter.apply(&records);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].reading.client_id, "123");
}

#[test]
fn test_stored_records_revalidate_identically() {
    let auditor = ReadingAuditor::new(settings()).unwrap();
    let records = auditor.process(&bundle_inputs());

    let json = serde_json::to_string_pretty(&records).unwrap();
    let mut restored: Vec<EnrichedRecord> = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, records);

    auditor.validate(&mut restored);
    assert_eq!(restored, records);
}

#[test]
fn test_malformed_history_is_the_only_hard_failure() {
    let bundle =
        ConsultationBundle::from_json_str(r#"{"data": [{"USUARIO": "1"}], "registros": 42}"#)
            .unwrap();
    assert!(matches!(
        bundle.into_inputs(Vec::new()),
        Err(AuditError::MalformedBundle(_))
    ));

    // garbage values inside well-formed rows are tolerated
    let bundle = ConsultationBundle::from_json_str(
        r#"{
            "data": [{"USUARIO": "1", "FECHAFACTURA": "mañana", "LECTURATOMADA": "n/a", "TIPOLECTURA": "10"}],
            "registros": [{"cliente": "1", "ano": "x", "mes": null, "codtarea": "10", "lectura_actual": "abc"}]
        }"#,
    )
    .unwrap();
    let inputs = bundle.into_inputs(Vec::new()).unwrap();
    let records = audit_readings(&inputs, &settings()).unwrap();
    assert_eq!(records[0].validation, ValidationState::Pending);
    assert_eq!(records[0].error_location.as_deref(), Some(READING_NOT_FOUND));
}

#[test]
fn test_one_bad_history_row_keeps_the_batch() {
    init_logging();

    let bundle = ConsultationBundle::from_json_str(
        r#"{
            "data": [{"USUARIO": "1", "FECHALECTURA": "10/01/2025", "FECHAFACTURA": "15/01/2025", "LECTURATOMADA": 70, "TIPOLECTURA": "10"}],
            "registros": [
                {"cliente": "1", "ano": 2025, "mes": 1, "codtarea": "10", "lectura_actual": true},
                {"cliente": "1", "ano": 2024, "mes": 12, "codtarea": "10", "lectura_actual": 70},
                "basura"
            ],
            "medidores_db": {"1": null}
        }"#,
    )
    .unwrap();
    let inputs = bundle.into_inputs(Vec::new()).unwrap();
    assert_eq!(inputs.historical_readings.len(), 2);

    let records = audit_readings(&inputs, &settings()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].history.value(1), None);
    assert_eq!(records[0].history.value(2), Some(70.0));
    assert_eq!(records[0].meter_number, None);
    assert_eq!(records[0].validation.label(), Some("PENDIENTE"));
}

#[test]
fn test_custom_pipeline() {
    let pipeline = ValidationPipeline::empty()
        .with_rule(InvoiceWindowRule::new(4, reference_date()))
        .with_rule(EnsurePendingRule)
        .with_rule(CoerceNumericFieldsRule)
        .with_rule(AlphanumericConfirmationRule);
    assert_eq!(pipeline.len(), 4);

    let mut reading = scenario_reading(80);
    reading.billed = Some(Measure::Text(" 4521 ".to_string()));
    let mut historical = trailing_history("123", [100, 90, 80, 70, 60, 50]);
    historical[2].observation = Some("cliente indica 4521".to_string());

    let inputs = AuditInputs {
        raw_readings: vec![reading],
        historical_readings: historical,
        ..Default::default()
    };
    let auditor = ReadingAuditor::with_pipeline(settings(), pipeline).unwrap();
    let records = auditor.process(&inputs);

    assert_eq!(records[0].reading.billed, Some(Measure::from(4521)));
    assert_eq!(records[0].validation.label(), Some("SI"));
    assert_eq!(records[0].error_location, None);
}

#[test]
fn test_settings_schema_and_loading() {
    let schema = ValidationSettings::json_schema().unwrap();
    assert!(schema.contains("consumption_tolerance"));

    let loaded = ValidationSettings::from_json_str(
        r#"{"consumption_tolerance": 0.25, "reference_date": "2025-02-10"}"#,
    )
    .unwrap();
    assert_eq!(loaded.invoice_window_months, 4);
    assert_eq!(loaded.aware_operator_code, "39");
    assert_eq!(loaded.today(), reference_date());

    assert!(ValidationSettings::from_json_str(r#"{"consumption_tolerance": 3.0}"#).is_err());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

fn observation_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::sample::select(vec![
        "lectura real".to_string(),
        "medidor dañado".to_string(),
        "1245".to_string(),
        "predio 12B".to_string(),
        "sin novedad".to_string(),
    ]))
}

fn record_strategy() -> impl Strategy<Value = EnrichedRecord> {
    (
        prop::collection::vec(prop::option::of(0i64..200), SLOT_COUNT),
        prop::collection::vec(observation_strategy(), SLOT_COUNT),
        0i64..200,
        prop::option::of(0i64..200),
        prop::sample::select(vec!["39", "12", ""]),
        prop::sample::select(vec!["15/01/2025", "01/03/2024", "sin fecha"]),
        prop::option::of(0i64..5_000_000),
    )
        .prop_map(|(values, observations, taken, billed, code, billed_on, kw)| {
            let mut record = EnrichedRecord::new(RawReading {
                client_id: "1".to_string(),
                billing_date: Some(billed_on.to_string()),
                taken: Some(Measure::Text(taken.to_string())),
                billed: billed.map(Measure::from),
                observation_code: Some(code.to_string()),
                reading_type: Some("10".to_string()),
                adjusted_kw: kw.map(Measure::from),
                ..Default::default()
            });
            for (idx, (value, observation)) in values.into_iter().zip(observations).enumerate() {
                record.history.set(idx + 1, value.map(Measure::from), observation);
            }
            record
        })
}

proptest! {
    #[test]
    fn prop_pipeline_is_idempotent(record in record_strategy()) {
        let settings = settings();
        for pipeline in [
            ValidationPipeline::standard(&settings),
            ValidationPipeline::extended(&settings),
        ] {
            let mut once = record.clone();
            pipeline.run(&mut once);

            let mut twice = once.clone();
            pipeline.run(&mut twice);

            prop_assert_eq!(&once, &twice);
            prop_assert!(!matches!(once.validation, ValidationState::Unset));
        }
    }

    #[test]
    fn prop_old_invoices_stay_rejected(mut record in record_strategy()) {
        record.reading.billing_date = Some("31/08/2024".to_string());
        let pipeline = ValidationPipeline::extended(&settings());
        pipeline.run(&mut record);

        prop_assert_eq!(
            record.validation,
            ValidationState::Rejected("Fecha de factura fuera de los 4 meses establecidos".to_string())
        );
    }
}
