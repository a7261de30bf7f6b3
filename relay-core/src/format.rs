//! Numeric formatting helpers
//!
//! Formatting never fails: a missing or non-finite value renders as zero at
//! the requested precision.

/// Format a value with a fixed number of decimals
pub fn format_decimal(value: Option<f64>, decimals: usize) -> String {
    let value = value.filter(|v| v.is_finite()).unwrap_or(0.0);
    format!("{:.*}", decimals, value)
}

/// Format a percentage with an explicit sign, e.g. `+2.15%`
pub fn format_percent(value: Option<f64>, decimals: usize) -> String {
    let value = value.filter(|v| v.is_finite()).unwrap_or(0.0);
    if value > 0.0 {
        format!("+{:.*}%", decimals, value)
    } else {
        format!("{:.*}%", decimals, value)
    }
}
