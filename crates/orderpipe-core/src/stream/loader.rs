//! JSON-lines loading of raw stream records.

use crate::record::{ChangeRecord, StreamRecord};
use crate::{Error, Result, StreamError};
use std::io::BufRead;
use std::path::Path;

/// Parse one raw stream record per line. Blank lines are skipped.
pub fn parse_json_lines(reader: impl BufRead) -> Result<Vec<ChangeRecord>> {
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let raw: StreamRecord = serde_json::from_str(trimmed).map_err(|e| {
            Error::Stream(StreamError::MalformedRecord {
                line: index + 1,
                message: e.to_string(),
            })
        })?;
        records.push(ChangeRecord::try_from(raw)?);
    }

    Ok(records)
}

/// Load raw stream records from a JSON-lines file.
pub fn load_json_lines(path: &Path) -> Result<Vec<ChangeRecord>> {
    let file = std::fs::File::open(path)?;
    parse_json_lines(std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventKind;
    use std::io::Write;

    #[test]
    fn test_parse_json_lines() {
        let input = concat!(
            r#"{"eventID":"1","eventName":"INSERT","dynamodb":{"ApproximateCreationDateTime":10,"NewImage":{"PK":{"S":"1000"}}}}"#,
            "\n\n",
            r#"{"eventID":"2","eventName":"REMOVE","dynamodb":{"ApproximateCreationDateTime":11}}"#,
            "\n"
        );

        let records = parse_json_lines(input.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].string_field("PK"), Some("1000"));
        assert_eq!(records[1].event_kind, EventKind::Remove);
        assert!(records[1].fields.is_empty());
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let input = "\n{not json}\n";
        let err = parse_json_lines(input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"), "got: {}", err);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"eventID":"1","eventName":"MODIFY","dynamodb":{{"NewImage":{{"PK":{{"S":"1"}}}}}}}}"#
        )
        .unwrap();

        let records = load_json_lines(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_kind, EventKind::Modify);
    }
}
