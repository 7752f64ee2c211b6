//! # Data Loading and Validation Module
//!
//! The exclusive entry point for the sales table. It reads a delimited file
//! with a header row, validates it against the fixed housing-sale schema and
//! converts each row into a [`HouseSale`].
//!
//! - Strict Schema: column names are not configurable. The module expects the
//!   `id`, `date`, `price`, ... `sqft_lot15` columns of the public sales table.
//! - User-Centric Errors: failures are assumed to be input errors and the
//!   `DataError` enum names the offending column.
//! - The same schema is used by [`write_sales`], so synthetic tables written
//!   by this crate load back unchanged.

use crate::record::{HouseSale, format_sale_date, parse_sale_date};
use polars::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Every column the loader requires, in the order the public table uses.
pub const REQUIRED_COLUMNS: [&str; 21] = [
    "id",
    "date",
    "price",
    "bedrooms",
    "bathrooms",
    "sqft_living",
    "sqft_lot",
    "floors",
    "waterfront",
    "view",
    "condition",
    "grade",
    "sqft_above",
    "sqft_basement",
    "yr_built",
    "yr_renovated",
    "zipcode",
    "lat",
    "long",
    "sqft_living15",
    "sqft_lot15",
];

const MINIMUM_ROWS: usize = 20;

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Row {row} has a sale date '{value}' that does not start with YYYYMM.")]
    InvalidSaleDate { row: usize, value: String },
    #[error(
        "Input file contains only {found} data rows, but at least {required} are required."
    )]
    InsufficientRows { found: usize, required: usize },
}

/// Loads and validates the sales table at `path`.
pub fn load_sales(path: &Path, delimiter: u8) -> Result<Vec<HouseSale>, DataError> {
    log::info!("Loading sales from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(CsvParseOptions::default().with_separator(delimiter)),
        )
        .finish()?;

    if df.height() < MINIMUM_ROWS {
        return Err(DataError::InsufficientRows {
            found: df.height(),
            required: MINIMUM_ROWS,
        });
    }

    let columns: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for name in REQUIRED_COLUMNS {
        if !columns.contains(name) {
            return Err(DataError::ColumnNotFound(name.to_string()));
        }
    }

    let ids = extract_id_column(&df, "id")?;
    let dates = extract_date_column(&df, "date")?;
    let price = extract_numeric_column(&df, "price")?;
    let bedrooms = extract_whole_column(&df, "bedrooms")?;
    let bathrooms = extract_numeric_column(&df, "bathrooms")?;
    let sqft_living = extract_numeric_column(&df, "sqft_living")?;
    let sqft_lot = extract_numeric_column(&df, "sqft_lot")?;
    let floors = extract_numeric_column(&df, "floors")?;
    let waterfront = extract_flag_column(&df, "waterfront")?;
    let view = extract_whole_column(&df, "view")?;
    let condition = extract_whole_column(&df, "condition")?;
    let grade = extract_whole_column(&df, "grade")?;
    let sqft_above = extract_numeric_column(&df, "sqft_above")?;
    let sqft_basement = extract_numeric_column(&df, "sqft_basement")?;
    let yr_built = extract_whole_column(&df, "yr_built")?;
    let yr_renovated = extract_whole_column(&df, "yr_renovated")?;
    let zipcode = extract_whole_column(&df, "zipcode")?;
    let lat = extract_numeric_column(&df, "lat")?;
    let long = extract_numeric_column(&df, "long")?;
    let sqft_living15 = extract_numeric_column(&df, "sqft_living15")?;
    let sqft_lot15 = extract_numeric_column(&df, "sqft_lot15")?;

    let mut sales = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let (sale_year, sale_month) =
            parse_sale_date(&dates[row]).ok_or_else(|| DataError::InvalidSaleDate {
                row: row + 1,
                value: dates[row].clone(),
            })?;
        sales.push(HouseSale {
            id: ids[row],
            sale_year,
            sale_month,
            price: price[row],
            bedrooms: bedrooms[row],
            bathrooms: bathrooms[row],
            sqft_living: sqft_living[row],
            sqft_lot: sqft_lot[row],
            floors: floors[row],
            waterfront: waterfront[row],
            view: view[row],
            condition: condition[row],
            grade: grade[row],
            sqft_above: sqft_above[row],
            sqft_basement: sqft_basement[row],
            yr_built: yr_built[row] as i32,
            yr_renovated: yr_renovated[row] as i32,
            zipcode: zipcode[row],
            lat: lat[row],
            long: long[row],
            sqft_living15: sqft_living15[row],
            sqft_lot15: sqft_lot15[row],
        });
    }

    log::info!("Loaded {} sales with all required columns", sales.len());
    Ok(sales)
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let casted = series
        .cast(&DataType::Float64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        })?;
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        });
    }

    let values: Vec<f64> = casted.f64()?.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

/// Non-negative whole numbers stored in any numeric column type.
fn extract_whole_column(df: &DataFrame, column_name: &str) -> Result<Vec<u32>, DataError> {
    let values = extract_numeric_column(df, column_name)?;
    values
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            if v < 0.0 || v.fract() != 0.0 || v > u32::MAX as f64 {
                Err(DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "non-negative whole number",
                    found_type: format!("value {v} at row {}", row + 1),
                })
            } else {
                Ok(v as u32)
            }
        })
        .collect()
}

fn extract_flag_column(df: &DataFrame, column_name: &str) -> Result<Vec<bool>, DataError> {
    let values = extract_whole_column(df, column_name)?;
    values
        .into_iter()
        .enumerate()
        .map(|(row, v)| match v {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "0/1 indicator",
                found_type: format!("value {other} at row {}", row + 1),
            }),
        })
        .collect()
}

fn extract_id_column(df: &DataFrame, column_name: &str) -> Result<Vec<i64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let casted = series
        .cast(&DataType::Int64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "integer identifier",
            found_type: format!("{:?}", series.dtype()),
        })?;
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "integer identifier",
            found_type: format!("{:?}", series.dtype()),
        });
    }
    Ok(casted.i64()?.into_no_null_iter().collect())
}

fn extract_date_column(df: &DataFrame, column_name: &str) -> Result<Vec<String>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let casted = series.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_no_null_iter()
        .map(|s| s.to_string())
        .collect())
}

/// Row layout of the sales table, used when writing sales back to disk.
#[derive(Serialize)]
struct SaleRow {
    id: i64,
    date: String,
    price: f64,
    bedrooms: u32,
    bathrooms: f64,
    sqft_living: f64,
    sqft_lot: f64,
    floors: f64,
    waterfront: u8,
    view: u32,
    condition: u32,
    grade: u32,
    sqft_above: f64,
    sqft_basement: f64,
    yr_built: i32,
    yr_renovated: i32,
    zipcode: u32,
    lat: f64,
    long: f64,
    sqft_living15: f64,
    sqft_lot15: f64,
}

impl From<&HouseSale> for SaleRow {
    fn from(sale: &HouseSale) -> Self {
        Self {
            id: sale.id,
            date: format_sale_date(sale.sale_year, sale.sale_month),
            price: sale.price,
            bedrooms: sale.bedrooms,
            bathrooms: sale.bathrooms,
            sqft_living: sale.sqft_living,
            sqft_lot: sale.sqft_lot,
            floors: sale.floors,
            waterfront: u8::from(sale.waterfront),
            view: sale.view,
            condition: sale.condition,
            grade: sale.grade,
            sqft_above: sale.sqft_above,
            sqft_basement: sale.sqft_basement,
            yr_built: sale.yr_built,
            yr_renovated: sale.yr_renovated,
            zipcode: sale.zipcode,
            lat: sale.lat,
            long: sale.long,
            sqft_living15: sale.sqft_living15,
            sqft_lot15: sale.sqft_lot15,
        }
    }
}

/// Writes sales as a comma-delimited table with the loader's schema.
pub fn write_sales(path: &Path, sales: &[HouseSale]) -> Result<(), DataError> {
    let mut writer = csv::Writer::from_path(path)?;
    for sale in sales {
        writer.serialize(SaleRow::from(sale))?;
    }
    writer.flush()?;
    log::info!("Wrote {} sales to '{}'", sales.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticSalesBuilder;
    use approx::assert_abs_diff_eq;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    const HEADER: &str = "id,date,price,bedrooms,bathrooms,sqft_living,sqft_lot,floors,waterfront,view,condition,grade,sqft_above,sqft_basement,yr_built,yr_renovated,zipcode,lat,long,sqft_living15,sqft_lot15";
    const ROW: &str = "7129300520,20141013T000000,221900,3,1,1180,5650,1,0,0,3,7,1180,0,1955,0,98178,47.5112,-122.257,1340,5650";

    fn create_test_csv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    fn generate_csv_content(header: &str, data_row: &str, num_rows: usize) -> String {
        let data_rows = std::iter::repeat(data_row)
            .take(num_rows)
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\n{}", header, data_rows)
    }

    #[test]
    fn loads_the_public_schema() {
        let content = generate_csv_content(HEADER, ROW, 25);
        let file = create_test_csv(&content).unwrap();
        let sales = load_sales(file.path(), b',').unwrap();

        assert_eq!(sales.len(), 25);
        let first = &sales[0];
        assert_eq!(first.id, 7129300520);
        assert_eq!((first.sale_year, first.sale_month), (2014, 10));
        assert_abs_diff_eq!(first.price, 221900.0, epsilon = 1e-9);
        assert_eq!(first.bedrooms, 3);
        assert!(!first.waterfront);
        assert_eq!(first.zipcode, 98178);
        assert_abs_diff_eq!(first.long, -122.257, epsilon = 1e-9);
    }

    #[test]
    fn written_sales_load_back() {
        let sales = SyntheticSalesBuilder::new(40).seed(3).build();
        let file = NamedTempFile::new().unwrap();
        write_sales(file.path(), &sales).unwrap();

        let loaded = load_sales(file.path(), b',').unwrap();
        assert_eq!(loaded.len(), sales.len());
        for (a, b) in loaded.iter().zip(&sales) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.bedrooms, b.bedrooms);
            assert_eq!(a.waterfront, b.waterfront);
            assert_eq!((a.sale_year, a.sale_month), (b.sale_year, b.sale_month));
            assert_abs_diff_eq!(a.price, b.price, epsilon = 1e-6);
            assert_abs_diff_eq!(a.lat, b.lat, epsilon = 1e-9);
        }
    }

    #[test]
    fn error_column_not_found() {
        let header = HEADER.replace(",sqft_lot15", "");
        let row = ROW.rsplit_once(',').unwrap().0;
        let content = generate_csv_content(&header, row, 25);
        let file = create_test_csv(&content).unwrap();
        match load_sales(file.path(), b',').unwrap_err() {
            DataError::ColumnNotFound(col) => assert_eq!(col, "sqft_lot15"),
            other => panic!("Expected ColumnNotFound, got {:?}", other),
        }
    }

    #[test]
    fn error_missing_values() {
        let row = ROW.replace(",221900,", ",,");
        let content = generate_csv_content(HEADER, &row, 25);
        let file = create_test_csv(&content).unwrap();
        match load_sales(file.path(), b',').unwrap_err() {
            DataError::MissingValuesFound(col) => assert_eq!(col, "price"),
            other => panic!("Expected MissingValuesFound(price), got {:?}", other),
        }
    }

    #[test]
    fn error_fractional_bedrooms() {
        let row = ROW.replace(",221900,3,", ",221900,2.5,");
        let content = generate_csv_content(HEADER, &row, 25);
        let file = create_test_csv(&content).unwrap();
        match load_sales(file.path(), b',').unwrap_err() {
            DataError::ColumnWrongType { column_name, .. } => assert_eq!(column_name, "bedrooms"),
            other => panic!("Expected ColumnWrongType(bedrooms), got {:?}", other),
        }
    }

    #[test]
    fn error_invalid_sale_date() {
        let row = ROW.replace("20141013T000000", "Oct-2014");
        let content = generate_csv_content(HEADER, &row, 25);
        let file = create_test_csv(&content).unwrap();
        match load_sales(file.path(), b',').unwrap_err() {
            DataError::InvalidSaleDate { row, value } => {
                assert_eq!(row, 1);
                assert_eq!(value, "Oct-2014");
            }
            other => panic!("Expected InvalidSaleDate, got {:?}", other),
        }
    }

    #[test]
    fn error_insufficient_rows() {
        let content = generate_csv_content(HEADER, ROW, 5);
        let file = create_test_csv(&content).unwrap();
        match load_sales(file.path(), b',').unwrap_err() {
            DataError::InsufficientRows { found, required } => {
                assert_eq!(found, 5);
                assert_eq!(required, 20);
            }
            other => panic!("Expected InsufficientRows, got {:?}", other),
        }
    }
}
