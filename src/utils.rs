use chrono::{Datelike, Days, Months, NaiveDate};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Parses a field-capture date. The capture sheets use `DD/MM/YYYY`; ISO
/// `YYYY-MM-DD` and Excel serial day numbers are accepted as well. A trailing
/// time component is ignored.
pub fn parse_reading_date(raw: &str) -> Option<NaiveDate> {
    let token = raw.split_whitespace().next()?;

    if let Ok(serial) = token.parse::<f64>() {
        return excel_serial_date(serial);
    }

    let parts: Vec<&str> = token.split('/').collect();
    if parts.len() == 3 {
        let day = parts[0].trim().parse::<u32>().ok()?;
        let month = parts[1].trim().parse::<u32>().ok()?;
        let year = parts[2].trim().parse::<i32>().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    NaiveDate::parse_from_str(token, "%Y-%m-%d").ok()
}

/// Day `serial` of the Excel 1900 date system (day 0 is 1899-12-30). The time
/// fraction is dropped.
pub fn excel_serial_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=EXCEL_MAX_SERIAL).contains(&serial) {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(serial.trunc() as u64))
}

/// 9999-12-31.
const EXCEL_MAX_SERIAL: f64 = 2_958_465.0;

pub fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month <= 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// Calendar month `back` months before `(year, month)`, rolling the year over.
pub fn months_back(year: i32, month: u32, back: u32) -> (i32, u32) {
    let mut current = (year, month);
    for _ in 0..back {
        current = prev_month(current.0, current.1);
    }
    current
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the month lying `back` months before the month of `date`.
pub fn month_start_before(date: NaiveDate, back: u32) -> Option<NaiveDate> {
    first_of_month(date).checked_sub_months(Months::new(back))
}

/// Canonical key for name matching: diacritics removed, whitespace collapsed,
/// upper-cased. Both the roster index and every lookup go through here.
pub fn normalize_name(name: &str) -> String {
    let stripped: String = name.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reading_date_formats() {
        assert_eq!(
            parse_reading_date("15/01/2025"),
            NaiveDate::from_ymd_opt(2025, 1, 15)
        );
        assert_eq!(
            parse_reading_date("5/3/2024 00:00:00"),
            NaiveDate::from_ymd_opt(2024, 3, 5)
        );
        assert_eq!(
            parse_reading_date("2024-11-30"),
            NaiveDate::from_ymd_opt(2024, 11, 30)
        );
    }

    #[test]
    fn test_parse_excel_serial_dates() {
        assert_eq!(parse_reading_date("45667"), NaiveDate::from_ymd_opt(2025, 1, 10));
        assert_eq!(parse_reading_date("45667.75"), NaiveDate::from_ymd_opt(2025, 1, 10));
        assert_eq!(parse_reading_date("1"), NaiveDate::from_ymd_opt(1899, 12, 31));
        assert_eq!(parse_reading_date("0"), None);
        assert_eq!(parse_reading_date("-3"), None);
        assert_eq!(parse_reading_date("20250110"), None);
    }

    #[test]
    fn test_parse_reading_date_rejects_garbage() {
        assert_eq!(parse_reading_date(""), None);
        assert_eq!(parse_reading_date("31/02/2024"), None);
        assert_eq!(parse_reading_date("sin fecha"), None);
        assert_eq!(parse_reading_date("12/2024"), None);
    }

    #[test]
    fn test_months_back_rolls_year() {
        assert_eq!(months_back(2025, 3, 0), (2025, 3));
        assert_eq!(months_back(2025, 3, 2), (2025, 1));
        assert_eq!(months_back(2025, 3, 3), (2024, 12));
        assert_eq!(months_back(2025, 1, 5), (2024, 8));
    }

    #[test]
    fn test_month_start_before() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 17).unwrap();
        assert_eq!(
            month_start_before(date, 5),
            NaiveDate::from_ymd_opt(2024, 9, 1)
        );
        assert_eq!(
            month_start_before(date, 0),
            NaiveDate::from_ymd_opt(2025, 2, 1)
        );
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  José   Pérez  "), "JOSE PEREZ");
        assert_eq!(normalize_name("María\tÁngela Núñez"), "MARIA ANGELA NUNEZ");
        assert_eq!(normalize_name(""), "");
    }
}
