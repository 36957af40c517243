//! CSV primitives for the ledger and day exports.
//!
//! Reading is lenient: ragged rows are allowed, cells are trimmed and blank
//! lines vanish. Writing uses standard quoting (only cells containing a
//! comma, quote or line break are quoted, `"` doubled) with LF endings.

use csv::{ReaderBuilder, Terminator, Trim, WriterBuilder};

pub type Row = Vec<String>;

/// Split CSV text into rows of trimmed cells.
pub fn parse_rows(text: &str) -> Result<Vec<Row>, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Serialize rows, one line each.
pub fn render_rows(rows: &[Row]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// True when a row has no roll and no name (cells 1 and 2).
pub fn is_blank_member(row: &[String]) -> bool {
    let cell = |i: usize| row.get(i).map(|c| c.trim()).unwrap_or("");
    cell(1).is_empty() && cell(2).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_respects_quotes_and_trims() {
        let rows = parse_rows("1, 7 ,\"Smith, Alice\",\"say \"\"hi\"\"\"\n").unwrap();
        assert_eq!(rows, vec![vec!["1", "7", "Smith, Alice", "say \"hi\""]]);
    }

    #[test]
    fn test_parse_ragged_rows_and_blank_lines() {
        let rows = parse_rows("a,b,c,d\n1,2\n\n,,Total Present,3\n").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["1", "2"]);
        assert_eq!(rows[2][2], "Total Present");
    }

    #[test]
    fn test_render_quotes_only_when_needed() {
        let rows = vec![
            vec!["1".to_string(), "7".into(), "Smith, Alice".into(), "".into()],
            vec!["2".to_string(), "8".into(), "Bob \"B\"".into(), "100".into()],
        ];
        let out = String::from_utf8(render_rows(&rows).unwrap()).unwrap();
        assert_eq!(out, "1,7,\"Smith, Alice\",\n2,8,\"Bob \"\"B\"\"\",100\n");
        assert_eq!(parse_rows(&out).unwrap(), rows);
    }

    #[test]
    fn test_blank_member() {
        let blank: Row = vec!["3".into(), " ".into(), "".into(), "P".into()];
        let named: Row = vec!["".into(), "".into(), "Alice".into()];
        assert!(is_blank_member(&blank));
        assert!(!is_blank_member(&named));
        assert!(is_blank_member(&["1".to_string()]));
    }
}
