use serde::{Deserialize, Serialize};

/// One housing sale as read from the input table.
///
/// Areas are in square feet. `yr_renovated == 0` means the home was never
/// renovated. The sale date is kept as its parsed year and month only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseSale {
    pub id: i64,
    pub sale_year: i32,
    pub sale_month: u32,
    pub price: f64,
    pub bedrooms: u32,
    pub bathrooms: f64,
    pub sqft_living: f64,
    pub sqft_lot: f64,
    pub floors: f64,
    pub waterfront: bool,
    pub view: u32,
    pub condition: u32,
    pub grade: u32,
    pub sqft_above: f64,
    pub sqft_basement: f64,
    pub yr_built: i32,
    pub yr_renovated: i32,
    pub zipcode: u32,
    pub lat: f64,
    pub long: f64,
    pub sqft_living15: f64,
    pub sqft_lot15: f64,
}

/// Parses the leading `YYYYMM` of a sale date such as `20141013T000000`.
pub fn parse_sale_date(raw: &str) -> Option<(i32, u32)> {
    let raw = raw.trim();
    if raw.len() < 6 || !raw.is_char_boundary(6) {
        return None;
    }
    let (year, rest) = raw.split_at(4);
    let month = &rest[..2];
    if !year.bytes().all(|b| b.is_ascii_digit()) || !month.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}

/// Formats a sale date the way the input table stores it.
pub fn format_sale_date(year: i32, month: u32) -> String {
    format!("{year:04}{month:02}01T000000")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timestamped_dates() {
        assert_eq!(parse_sale_date("20141013T000000"), Some((2014, 10)));
        assert_eq!(parse_sale_date("201505"), Some((2015, 5)));
    }

    #[test]
    fn rejects_malformed_dates() {
        assert_eq!(parse_sale_date("2014"), None);
        assert_eq!(parse_sale_date("20141313T000000"), None);
        assert_eq!(parse_sale_date("2014-10-13"), None);
        assert_eq!(parse_sale_date("abcd10"), None);
    }

    #[test]
    fn formatted_dates_parse_back() {
        let raw = format_sale_date(2014, 7);
        assert_eq!(raw, "20140701T000000");
        assert_eq!(parse_sale_date(&raw), Some((2014, 7)));
    }
}
