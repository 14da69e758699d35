//! Certificate row matching shared by the native and in-page selectors.
//!
//! Selection dialogs show the serial number truncated to whatever fits the
//! column, so rows are compared on a normalised form (upper-case ASCII
//! alphanumerics) and the serial is matched by containment in either
//! direction or by its first [`SERIAL_PREFIX_LEN`] characters.

use crate::certs::SelectionFilter;

/// Number of leading serial characters that identify a certificate.
pub const SERIAL_PREFIX_LEN: usize = 16;

/// Shortest row text accepted as a truncated serial.
const MIN_TRUNCATED_SERIAL: usize = 8;

/// How a row was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowMatch {
    /// The row shows the certificate serial.
    Serial,
    /// The row shows the subject common name.
    CommonName,
}

/// Upper-cases `text` and drops everything but ASCII letters and digits.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn serial_matches(target: &str, row: &str) -> bool {
    if target.is_empty() || row.is_empty() {
        return false;
    }
    let prefix = &target[..target.len().min(SERIAL_PREFIX_LEN)];
    row.contains(target)
        || row.contains(prefix)
        || (row.len() >= MIN_TRUNCATED_SERIAL && target.contains(row))
}

/// Picks the row that shows the filter's certificate.
///
/// Every row is checked for the serial first; only when no row shows it is
/// the subject common name tried. Returns the index of the first match.
#[must_use]
pub fn pick_row<S: AsRef<str>>(filter: &SelectionFilter, rows: &[S]) -> Option<(usize, RowMatch)> {
    let normalized: Vec<String> = rows.iter().map(|r| normalize(r.as_ref())).collect();

    if let Some(serial) = filter.serial.as_deref() {
        let target = normalize(serial);
        if let Some(index) = normalized.iter().position(|row| serial_matches(&target, row)) {
            return Some((index, RowMatch::Serial));
        }
    }

    let subject = normalize(&filter.subject_cn);
    if subject.is_empty() {
        return None;
    }
    normalized
        .iter()
        .position(|row| row.contains(&subject))
        .map(|index| (index, RowMatch::CommonName))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERIAL: &str = "2DBB3D0D060A312066E40192B2676785";

    fn filter() -> SelectionFilter {
        SelectionFilter::new("GARCIA LOPEZ ANA - 12345678Z", "AC FNMT Usuarios").with_serial(SERIAL)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("García López, Ana - 1234"), "GARCALPEZANA1234");
        assert_eq!(normalize("2d:bb:3d"), "2DBB3D");
    }

    #[test]
    fn test_truncated_serial_prefix() {
        let rows = [
            "OTRO TITULAR | AC FNMT Usuarios | 11AA22BB33CC44DD",
            "GARCIA LOPEZ ANA | AC FNMT Usuarios | 2DBB3D0D060A3120...",
        ];
        assert_eq!(pick_row(&filter(), &rows), Some((1, RowMatch::Serial)));
    }

    #[test]
    fn test_row_text_inside_serial() {
        let rows = ["2DBB3D0D06"];
        assert_eq!(pick_row(&filter(), &rows), Some((0, RowMatch::Serial)));
    }

    #[test]
    fn test_serial_has_priority_over_cn() {
        let rows = [
            "GARCIA LOPEZ ANA - 12345678Z | 00FF",
            "GARCIA LOPEZ ANA - 12345678Z | 2DBB3D0D060A312066E4",
        ];
        assert_eq!(pick_row(&filter(), &rows), Some((1, RowMatch::Serial)));
    }

    #[test]
    fn test_cn_fallback() {
        let rows = ["EMPRESA SL", "GARCIA LOPEZ ANA - 12345678Z (AC FNMT Usuarios)"];
        assert_eq!(pick_row(&filter(), &rows), Some((1, RowMatch::CommonName)));
    }

    #[test]
    fn test_no_match() {
        let rows = ["EMPRESA SL", "", "A"];
        assert_eq!(pick_row(&filter(), &rows), None);
        let empty: [&str; 0] = [];
        assert_eq!(pick_row(&filter(), &empty), None);
    }

    #[test]
    fn test_short_rows_do_not_match_serial() {
        // "2D" is inside the serial but too short to identify it.
        let rows = ["2D"];
        assert_eq!(
            pick_row(&SelectionFilter::new("", "").with_serial(SERIAL), &rows),
            None
        );
    }
}
