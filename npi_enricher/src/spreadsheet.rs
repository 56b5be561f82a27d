//! Spreadsheet adapters for practitioner uploads and enriched results.
//!
//! Excel workbooks (`.xlsx`) are read with calamine and written with rust_xlsxwriter; `.csv`
//! files go through the csv crate. Both share header matching and the output column order.

use calamine::{Reader, Xlsx, open_workbook_from_rs};
use csv::{ReaderBuilder, StringRecord, Writer};
use rust_xlsxwriter::{Workbook, XlsxError};
use std::{fs, io::Cursor, path::Path};

use crate::{
    constants::{OUTPUT_COLUMNS, REQUIRED_INPUT_COLUMNS},
    error::{Error, Result},
    models::{InputRow, OutputRow},
};

/// File formats accepted for uploads; results are written in the upload's format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Xlsx,
    Csv,
}

impl SheetFormat {
    /// Picks the format from the file extension, ignoring case.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|x| x.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") => Ok(SheetFormat::Xlsx),
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(SheetFormat::Csv),
            _ => Err(Error::InputValidation(format!(
                "Only .xlsx and .csv files are accepted, got {:?}",
                path.display().to_string()
            ))),
        }
    }

    pub fn from_file_name(file_name: &str) -> Result<Self> {
        Self::from_path(Path::new(file_name))
    }

    pub fn extension(self) -> &'static str {
        match self {
            SheetFormat::Xlsx => "xlsx",
            SheetFormat::Csv => "csv",
        }
    }
}

/// Header row plus data rows, as text.
struct Table {
    headers: StringRecord,
    records: Vec<StringRecord>,
}

fn read_table(format: SheetFormat, bytes: &[u8]) -> Result<Table> {
    match format {
        SheetFormat::Xlsx => xlsx_table(bytes),
        SheetFormat::Csv => csv_table(bytes),
    }
}

fn csv_table(bytes: &[u8]) -> Result<Table> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|err| Error::InputValidation(format!("Unreadable CSV header: {err}")))?
        .clone();

    let mut records = Vec::new();
    for (line, record) in reader.records().enumerate() {
        records.push(record.map_err(|err| {
            Error::InputValidation(format!("Malformed CSV record {}: {err}", line + 1))
        })?);
    }
    Ok(Table { headers, records })
}

/// First worksheet only. Its first row is the header; fully blank rows are skipped.
fn xlsx_table(bytes: &[u8]) -> Result<Table> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
        .map_err(|err| Error::InputValidation(format!("Unreadable workbook: {err}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::InputValidation("Workbook has no worksheets".to_string()))?
        .map_err(|err| Error::InputValidation(format!("Unreadable worksheet: {err}")))?;

    let mut rows = range.rows().map(|cells| {
        cells
            .iter()
            .map(|cell| cell.to_string())
            .collect::<StringRecord>()
    });
    let headers = rows.next().unwrap_or_default();
    let records = rows
        .filter(|record| record.iter().any(|cell| !cell.trim().is_empty()))
        .collect();
    Ok(Table { headers, records })
}

pub fn read_input_rows(path: &Path) -> Result<Vec<InputRow>> {
    let format = SheetFormat::from_path(path)?;
    let bytes = fs::read(path)?;
    read_input_bytes(format, &bytes)
}

/// Reads `First_Name`, `Last_Name` and `State` from an upload. Headers are trimmed and
/// compared ignoring ASCII case; other columns are ignored.
pub fn read_input_bytes(format: SheetFormat, bytes: &[u8]) -> Result<Vec<InputRow>> {
    let table = read_table(format, bytes)?;

    let first_idx = header_index(&table.headers, REQUIRED_INPUT_COLUMNS[0])?;
    let last_idx = header_index(&table.headers, REQUIRED_INPUT_COLUMNS[1])?;
    let state_idx = header_index(&table.headers, REQUIRED_INPUT_COLUMNS[2])?;

    Ok(table
        .records
        .iter()
        .map(|record| {
            let cell = |idx: usize| record.get(idx).unwrap_or("");
            InputRow::new(cell(first_idx), cell(last_idx), cell(state_idx))
        })
        .collect())
}

fn header_index(headers: &StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
        .ok_or_else(|| Error::InputValidation(format!("Missing required column: {name}")))
}

/// Writes enriched rows with the fixed output header, in the format named by the
/// extension of `output_path`. The file is staged next to `output_path` and renamed into
/// place once complete.
pub fn write_output_rows(rows: &[OutputRow], output_path: &Path) -> Result<()> {
    if rows.is_empty() {
        return Err(Error::OutputWrite("No rows to write".to_string()));
    }
    let format = SheetFormat::from_path(output_path)
        .map_err(|err| Error::OutputWrite(err.to_string()))?;

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            Error::OutputWrite(format!(
                "Failed creating output directory {}: {err}",
                parent.display()
            ))
        })?;
    }

    let file_name = output_path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("results");
    let tmp_path = output_path.with_file_name(format!("{file_name}.tmp"));

    let written = match format {
        SheetFormat::Xlsx => write_xlsx_rows(rows, &tmp_path),
        SheetFormat::Csv => write_csv_rows(rows, &tmp_path),
    }
    .and_then(|()| {
        fs::rename(&tmp_path, output_path).map_err(|err| {
            Error::OutputWrite(format!(
                "Failed moving {} to {}: {err}",
                tmp_path.display(),
                output_path.display()
            ))
        })
    });
    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    written
}

fn write_csv_rows(rows: &[OutputRow], path: &Path) -> Result<()> {
    let write_err = |err: csv::Error| {
        Error::OutputWrite(format!("Failed writing {}: {err}", path.display()))
    };

    let mut writer = Writer::from_path(path).map_err(write_err)?;
    // Serialized field names carry the header row.
    for row in rows {
        writer.serialize(row).map_err(write_err)?;
    }
    writer.flush().map_err(|err| {
        Error::OutputWrite(format!("Failed flushing {}: {err}", path.display()))
    })?;
    Ok(())
}

fn write_xlsx_rows(rows: &[OutputRow], path: &Path) -> Result<()> {
    let write_err = |err: XlsxError| {
        Error::OutputWrite(format!("Failed writing {}: {err}", path.display()))
    };

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, name) in OUTPUT_COLUMNS.iter().enumerate() {
        sheet.write_string(0, col as u16, *name).map_err(write_err)?;
    }
    for (index, row) in rows.iter().enumerate() {
        let line = u32::try_from(index + 1)
            .map_err(|_| Error::OutputWrite("Too many rows for one worksheet".to_string()))?;
        // Absent values stay blank cells.
        for (col, value) in row.cells().into_iter().enumerate() {
            if let Some(value) = value {
                sheet.write_string(line, col as u16, value).map_err(write_err)?;
            }
        }
    }
    workbook.save(path).map_err(write_err)?;
    Ok(())
}

/// Reads a results file back in either format, checking the header row.
pub fn read_output_rows(path: &Path) -> Result<Vec<OutputRow>> {
    let format = SheetFormat::from_path(path)?;
    let table = read_table(format, &fs::read(path)?)?;
    if !table.headers.iter().eq(OUTPUT_COLUMNS.iter().copied()) {
        return Err(Error::InputValidation(format!(
            "Unexpected results header in {}",
            path.display()
        )));
    }

    let mut rows = Vec::with_capacity(table.records.len());
    for record in &table.records {
        rows.push(record.deserialize(Some(&table.headers))?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RowStatus;
    use tempfile::tempdir;

    fn full_row() -> OutputRow {
        OutputRow {
            first_name: Some("Jane".into()),
            last_name: Some("Doe".into()),
            state: Some("CA".into()),
            found_first_name: Some("JANE".into()),
            found_last_name: Some("DOE".into()),
            found_state: Some("CA".into()),
            full_name: Some("JANE Q DOE".into()),
            npi_number: Some("1234567890".into()),
            mailing_address: Some("PO Box 1, SACRAMENTO CA 95814".into()),
            primary_practice_address: Some("1 Main St, SACRAMENTO CA 95814, Phone: 555".into()),
            secondary_practice_address: Some("2 Elm St; 3 Oak St, \"Annex\"".into()),
            taxonomy: Some("CA-101Y00000X".into()),
            specialty: Some("Family Medicine".into()),
            license: Some("CA-12345".into()),
            status: RowStatus::Success,
        }
    }

    fn mixed_rows() -> Vec<OutputRow> {
        vec![
            full_row(),
            OutputRow::bare(&InputRow::new("Ann", "Lee", "TX"), RowStatus::NoMatch),
            OutputRow::bare(&InputRow::new("Bo", "Kim", ""), RowStatus::Failed),
        ]
    }

    #[test]
    fn reads_required_columns_with_messy_headers() {
        let csv = " first_name ,Last_Name,Extra, STATE\nJane,Doe,x,CA\n,Smith,y,\n";
        let rows = read_input_bytes(SheetFormat::Csv, csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], InputRow::new("Jane", "Doe", "CA"));
        assert_eq!(rows[1].first_name, None);
        assert_eq!(rows[1].last_name.as_deref(), Some("Smith"));
        assert_eq!(rows[1].state, None);
    }

    #[test]
    fn missing_column_is_rejected_by_name() {
        let csv = "First_Name,Last_Name\nJane,Doe\n";
        let err = read_input_bytes(SheetFormat::Csv, csv.as_bytes()).unwrap_err();
        match err {
            Error::InputValidation(msg) => assert!(msg.contains("State"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(SheetFormat::from_file_name("names.xlsx").unwrap(), SheetFormat::Xlsx);
        assert_eq!(SheetFormat::from_file_name("NAMES.XLSX").unwrap(), SheetFormat::Xlsx);
        assert_eq!(SheetFormat::from_file_name("names.csv").unwrap(), SheetFormat::Csv);
        assert_eq!(SheetFormat::from_file_name("NAMES.CSV").unwrap(), SheetFormat::Csv);
        assert!(matches!(
            SheetFormat::from_file_name("names.txt"),
            Err(Error::InputValidation(_))
        ));
        assert!(SheetFormat::from_file_name("names").is_err());
    }

    #[test]
    fn reads_xlsx_upload_with_messy_headers() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in [" first_name ", "Extra", "LAST_NAME", "State "].iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        sheet.write_string(1, 0, "Jane").unwrap();
        sheet.write_number(1, 1, 42.0).unwrap();
        sheet.write_string(1, 2, "Doe").unwrap();
        sheet.write_string(1, 3, "CA").unwrap();
        sheet.write_string(2, 2, "Smith").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let rows = read_input_bytes(SheetFormat::Xlsx, &bytes).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], InputRow::new("Jane", "Doe", "CA"));
        assert_eq!(rows[1], InputRow::new("", "Smith", ""));
    }

    #[test]
    fn xlsx_missing_column_is_rejected_by_name() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "First_Name").unwrap();
        sheet.write_string(0, 1, "State").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        match read_input_bytes(SheetFormat::Xlsx, &bytes).unwrap_err() {
            Error::InputValidation(msg) => assert!(msg.contains("Last_Name"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bytes_that_are_not_a_workbook_are_invalid_input() {
        assert!(matches!(
            read_input_bytes(SheetFormat::Xlsx, b"First_Name,Last_Name,State\n"),
            Err(Error::InputValidation(_))
        ));
    }

    #[test]
    fn empty_output_is_an_error_and_writes_nothing() {
        let dir = tempdir().unwrap();
        for name in ["out.csv", "out.xlsx"] {
            let path = dir.path().join(name);
            let err = write_output_rows(&[], &path).unwrap_err();
            assert!(matches!(err, Error::OutputWrite(_)));
            assert!(!path.exists());
        }
    }

    #[test]
    fn output_round_trips_every_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let rows = mixed_rows();

        write_output_rows(&rows, &path).unwrap();
        assert!(!dir.path().join("nested").join("out.csv.tmp").exists());

        let back = read_output_rows(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn xlsx_output_round_trips_every_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.xlsx");
        let rows = mixed_rows();

        write_output_rows(&rows, &path).unwrap();
        assert!(!dir.path().join("nested").join("out.xlsx.tmp").exists());

        let back = read_output_rows(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn header_row_matches_output_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_output_rows(&[full_row()], &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, OUTPUT_COLUMNS.join(","));
    }

    #[test]
    fn xlsx_header_row_matches_output_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.xlsx");
        write_output_rows(&[full_row()], &path).unwrap();

        let table = read_table(SheetFormat::Xlsx, &fs::read(&path).unwrap()).unwrap();
        assert!(table.headers.iter().eq(OUTPUT_COLUMNS.iter().copied()));
        assert_eq!(table.records.len(), 1);
    }

    #[test]
    fn unsupported_output_extension_is_a_write_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.txt");
        assert!(matches!(
            write_output_rows(&[full_row()], &path),
            Err(Error::OutputWrite(_))
        ));
        assert!(!path.exists());
    }
}
