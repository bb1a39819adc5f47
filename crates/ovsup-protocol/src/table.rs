//! Comma-delimited tables from the `status` dump.

use std::collections::HashMap;

/// One table row keyed by column header.
pub type Record = HashMap<String, String>;

/// Parses a header row plus data rows into records.
///
/// The last column absorbs any extra commas, so free-form trailing
/// columns such as timestamps survive intact. Short rows simply lack the
/// missing keys; blank rows are ignored.
pub fn parse_table(text: &str) -> Vec<Record> {
    let mut lines = text.lines();
    let columns: Vec<&str> = match lines.next() {
        Some(header) if !header.trim().is_empty() => header.split(',').collect(),
        _ => return Vec::new(),
    };

    lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            columns
                .iter()
                .zip(line.splitn(columns.len(), ','))
                .map(|(column, value)| ((*column).to_string(), value.to_string()))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixture_row() {
        let records = parse_table(
            "Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since\n\
             VPN_client,10.13.156.4:1194,12563,14885,Thu Feb 13 23:39:20 2014",
        );

        assert_eq!(records.len(), 1);
        let record = records.first().unwrap();
        assert_eq!(record.get("Common Name").unwrap(), "VPN_client");
        assert_eq!(record.get("Real Address").unwrap(), "10.13.156.4:1194");
        assert_eq!(record.get("Bytes Received").unwrap(), "12563");
        assert_eq!(record.get("Bytes Sent").unwrap(), "14885");
        assert_eq!(
            record.get("Connected Since").unwrap(),
            "Thu Feb 13 23:39:20 2014"
        );
    }

    #[test]
    fn test_last_column_keeps_commas() {
        let records = parse_table("Name,Note\nalice,one, two, three");
        assert_eq!(
            records.first().and_then(|r| r.get("Note")).map(String::as_str),
            Some("one, two, three")
        );
    }

    #[test]
    fn test_short_row_lacks_keys() {
        let records = parse_table("A,B,C\n1,2");
        let record = records.first().unwrap();
        assert_eq!(record.len(), 2);
        assert!(record.get("C").is_none());
    }

    #[test]
    fn test_header_only_and_empty() {
        assert!(parse_table("A,B").is_empty());
        assert!(parse_table("").is_empty());
        assert!(parse_table("A,B\n\n").is_empty());
    }
}
