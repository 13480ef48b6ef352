//! Pinpoints the decimal place at which a miskeyed reading departs from a
//! trustworthy reference reading.

use crate::record::DigitFault;

/// Name of the decimal place `from_right` digits from the right.
pub fn place_name(from_right: usize) -> String {
    let name = match from_right {
        1 => "unidad",
        2 => "decena",
        3 => "centena",
        4 => "unidad de mil",
        5 => "decena de mil",
        6 => "centena de mil",
        7 => "unidad de millón",
        8 => "decena de millón",
        n => return format!("{}º lugar", n),
    };
    name.to_string()
}

/// Compares the two readings digit by digit, left-padding the shorter one
/// with zeros, and reports the first mismatch only.
pub fn locate_digit_fault(taken: f64, reference: f64) -> Option<DigitFault> {
    let taken_text = taken.to_string();
    let reference_text = reference.to_string();
    let width = taken_text.chars().count().max(reference_text.chars().count());

    let a: Vec<char> = left_pad(&taken_text, width).chars().collect();
    let b: Vec<char> = left_pad(&reference_text, width).chars().collect();

    let idx = a.iter().zip(&b).position(|(x, y)| x != y)?;
    let from_right = width - idx;

    Some(DigitFault {
        position: idx + 1,
        from_right,
        place: place_name(from_right),
        taken_digit: a[idx],
        reference_digit: b[idx],
    })
}

fn left_pad(text: &str, width: usize) -> String {
    let missing = width.saturating_sub(text.chars().count());
    let mut padded = "0".repeat(missing);
    padded.push_str(text);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hundreds_fault() {
        let fault = locate_digit_fault(12345.0, 12445.0).unwrap();
        assert_eq!(fault.position, 3);
        assert_eq!(fault.from_right, 3);
        assert_eq!(fault.place, "centena");
        assert_eq!(fault.taken_digit, '3');
        assert_eq!(fault.reference_digit, '4');
    }

    #[test]
    fn test_shorter_value_is_zero_padded() {
        let fault = locate_digit_fault(987.0, 1987.0).unwrap();
        assert_eq!(fault.position, 1);
        assert_eq!(fault.from_right, 4);
        assert_eq!(fault.place, "unidad de mil");
        assert_eq!(fault.taken_digit, '0');
        assert_eq!(fault.reference_digit, '1');
    }

    #[test]
    fn test_equal_values_have_no_fault() {
        assert!(locate_digit_fault(4521.0, 4521.0).is_none());
    }

    #[test]
    fn test_only_first_mismatch_reported() {
        let fault = locate_digit_fault(1999.0, 2000.0).unwrap();
        assert_eq!(fault.position, 1);
        assert_eq!(fault.place, "unidad de mil");
    }

    #[test]
    fn test_place_names_beyond_table() {
        assert_eq!(place_name(1), "unidad");
        assert_eq!(place_name(8), "decena de millón");
        assert_eq!(place_name(9), "9º lugar");
    }
}
