//! Conversion between the device's decibel volume and a 0 to 100 UI scale.
//!
//! Receivers report the main zone volume in decibels, from -92 dB (quietest)
//! up to 0 dB. User interfaces usually want a percentage instead.
//!
//! ```
//! use nadproto::volume::{db_from_ui, ui_from_db};
//!
//! assert_eq!(ui_from_db(-46.0), 50);
//! assert_eq!(db_from_ui(50), -46);
//! ```

/// The quietest volume, in decibels.
pub const MIN_DB: f64 = -92.0;

/// The width of the decibel range mapped onto the UI scale.
const DB_RANGE: f64 = 0.0 - MIN_DB;

/// The top of the UI scale.
pub const MAX_UI: u8 = 100;

/// Convert a volume in decibels to the UI scale.
///
/// Values outside the device's range are clamped.
pub fn ui_from_db(db: f64) -> u8 {
    let ui = ((db - MIN_DB) * f64::from(MAX_UI) / DB_RANGE).round();
    if ui.is_nan() {
        return 0;
    }
    // Clamped to 0..=100 so the cast cannot truncate.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let ui = ui.clamp(0.0, f64::from(MAX_UI)) as u8;
    ui
}

/// Convert a UI volume to decibels, rounded to the nearest whole decibel.
///
/// UI values outside `0..=100` are clamped.
pub fn db_from_ui(ui: i32) -> i32 {
    let ui = f64::from(ui.clamp(0, i32::from(MAX_UI)));
    // Always within -92..=0.
    #[allow(clippy::cast_possible_truncation)]
    let db = (ui * DB_RANGE / f64::from(MAX_UI) + MIN_DB).round() as i32;
    db
}

/// Parse a decibel value as the device reports it.
///
/// The value may have a fractional part and a `dB` suffix: `-40`, `-40.5`
/// and `-40.5dB` are all accepted.
pub fn parse_db(value: &str) -> Option<f64> {
    let value = value.trim();
    let number = value
        .strip_suffix("dB")
        .or_else(|| value.strip_suffix("db"))
        .or_else(|| value.strip_suffix("DB"))
        .unwrap_or(value)
        .trim();
    number.parse::<f64>().ok().filter(|db| db.is_finite())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn end_points() {
        assert_eq!(ui_from_db(-92.0), 0);
        assert_eq!(ui_from_db(0.0), 100);
        assert_eq!(db_from_ui(0), -92);
        assert_eq!(db_from_ui(100), 0);
    }

    #[test]
    fn out_of_range_is_clamped() {
        assert_eq!(ui_from_db(-120.0), 0);
        assert_eq!(ui_from_db(12.0), 100);
        assert_eq!(db_from_ui(-5), -92);
        assert_eq!(db_from_ui(250), 0);
    }

    #[test]
    fn round_trip_is_within_one_step() {
        for ui in 0..=100 {
            let back = i32::from(ui_from_db(f64::from(db_from_ui(ui))));
            assert!((back - ui).abs() <= 1, "{ui} came back as {back}");
        }
    }

    #[test]
    fn parse_device_values() {
        assert_eq!(parse_db("-46"), Some(-46.0));
        assert_eq!(parse_db(" -40.5dB "), Some(-40.5));
        assert_eq!(parse_db("-12 dB"), Some(-12.0));
        assert_eq!(parse_db("0"), Some(0.0));
        assert_eq!(parse_db("loud"), None);
        assert_eq!(parse_db(""), None);
        assert_eq!(parse_db("NaN"), None);
    }

    #[test]
    fn fractional_values_round() {
        assert_eq!(ui_from_db(-45.0), 51);
        assert_eq!(ui_from_db(-46.4), 50);
    }
}
