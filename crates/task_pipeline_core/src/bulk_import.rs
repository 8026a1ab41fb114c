//! Bulk CSV upload validation.
//!
//! An upload is accepted or rejected as a whole: every data row is checked
//! against the create schema and all violations are reported together, each
//! annotated with the row number the caller sees in the original text
//! (the header is row 1).

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::contract::{
    collect_field_violations, CreateTaskRequest, FieldViolation, ValidationError,
};

const TITLE_COLUMN: &str = "title";
const DETAIL_COLUMN: &str = "detail";
const DUE_AT_COLUMN: &str = "dueAt";
const IS_COMPLETE_COLUMN: &str = "isComplete";

#[derive(Debug, thiserror::Error)]
pub enum BulkImportError {
    #[error("malformed upload: {message}")]
    Parse { message: String },
    #[error("upload exceeds the limit of {limit} data rows")]
    TooManyRows { limit: usize },
    #[error("upload rejected: {0}")]
    Rejected(ValidationError),
}

impl BulkImportError {
    fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnLayout {
    title: usize,
    detail: Option<usize>,
    due_at: Option<usize>,
    is_complete: Option<usize>,
}

impl ColumnLayout {
    fn from_header(header: &StringRecord) -> Result<Self, BulkImportError> {
        let position = |name: &str| header.iter().position(|column| column == name);

        let title = position(TITLE_COLUMN).ok_or_else(|| {
            BulkImportError::parse(format!(
                "header row must name a '{TITLE_COLUMN}' column (found: {})",
                header.iter().collect::<Vec<_>>().join(",")
            ))
        })?;

        Ok(Self {
            title,
            detail: position(DETAIL_COLUMN),
            due_at: position(DUE_AT_COLUMN),
            is_complete: position(IS_COMPLETE_COLUMN),
        })
    }
}

/// Parses and validates an upload into create requests, preserving row
/// order. Zero data rows yields an empty list.
pub fn parse_task_upload(
    text: &str,
    max_rows: usize,
) -> Result<Vec<CreateTaskRequest>, BulkImportError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());
    let mut records = reader.records();

    let header = loop {
        match records.next() {
            None => return Err(BulkImportError::parse("missing header row")),
            Some(Err(error)) => return Err(BulkImportError::parse(error.to_string())),
            Some(Ok(record)) if is_blank(&record) => continue,
            Some(Ok(record)) => break record,
        }
    };
    let layout = ColumnLayout::from_header(&header)?;

    let mut rows = Vec::new();
    for result in records {
        let record = result.map_err(|error| BulkImportError::parse(error.to_string()))?;
        if is_blank(&record) {
            continue;
        }
        if rows.len() == max_rows {
            return Err(BulkImportError::TooManyRows { limit: max_rows });
        }
        let row_number = record
            .position()
            .and_then(|position| usize::try_from(position.line()).ok())
            .unwrap_or(rows.len() + 2);
        rows.push((row_number, record));
    }

    let mut accepted = Vec::with_capacity(rows.len());
    let mut violations = Vec::new();
    for (row_number, record) in &rows {
        match validate_row(&layout, record, *row_number) {
            Ok(request) => accepted.push(request),
            Err(row_violations) => violations.extend(row_violations),
        }
    }

    if violations.is_empty() {
        Ok(accepted)
    } else {
        Err(BulkImportError::Rejected(ValidationError::from_violations(
            violations,
        )))
    }
}

/// `"true"` and `"1"` are the only truthy literals; matching is
/// case-sensitive and anything else, including an empty cell, is false.
pub fn parse_is_complete(cell: &str) -> bool {
    matches!(cell, "true" | "1")
}

fn validate_row(
    layout: &ColumnLayout,
    record: &StringRecord,
    row_number: usize,
) -> Result<CreateTaskRequest, Vec<FieldViolation>> {
    let cell = |index: Option<usize>| {
        index
            .and_then(|index| record.get(index))
            .filter(|value| !value.is_empty())
    };

    let request = CreateTaskRequest {
        title: cell(Some(layout.title)).unwrap_or_default().to_string(),
        detail: cell(layout.detail).map(str::to_string),
        due_at: cell(layout.due_at).map(str::to_string),
        is_complete: cell(layout.is_complete)
            .map(parse_is_complete)
            .unwrap_or(false),
    };

    let mut violations = Vec::new();
    collect_field_violations(
        &request.title,
        request.detail.as_deref(),
        request.due_at.as_deref(),
        &mut violations,
    );

    if violations.is_empty() {
        Ok(request)
    } else {
        Err(violations
            .into_iter()
            .map(|violation| violation.at_row(row_number))
            .collect())
    }
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(str::is_empty)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use crate::contract::DEFAULT_MAX_IMPORT_ROWS;

    use super::*;

    fn parse(text: &str) -> Result<Vec<CreateTaskRequest>, BulkImportError> {
        parse_task_upload(text, DEFAULT_MAX_IMPORT_ROWS)
    }

    fn rejected_violations(
        result: Result<Vec<CreateTaskRequest>, BulkImportError>,
    ) -> Vec<FieldViolation> {
        match result {
            Err(BulkImportError::Rejected(error)) => error.into_violations(),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn rejects_whole_upload_when_one_row_lacks_title() {
        let text = "title,detail,dueAt,isComplete\nBuy milk,,,true\n,Oops,2020-01-01T00:00:00Z,false";

        let violations = rejected_violations(parse(text));
        assert_eq!(
            violations,
            vec![FieldViolation::new("title", "required").at_row(3)]
        );
    }

    #[test]
    fn header_only_upload_yields_no_records() {
        let records = parse("title,detail,dueAt,isComplete\n").expect("empty upload is valid");
        assert!(records.is_empty());
    }

    #[test]
    fn trims_cells_and_skips_blank_lines() {
        let text = " title , detail ,dueAt,isComplete\n\n  Buy milk  ,  two litres ,, 1 \n\n";

        let records = parse(text).expect("upload should validate");
        assert_eq!(
            records,
            vec![CreateTaskRequest {
                title: "Buy milk".to_string(),
                detail: Some("two litres".to_string()),
                due_at: None,
                is_complete: true,
            }]
        );
    }

    #[test]
    fn row_numbers_follow_the_original_text() {
        let text = "title,dueAt\nok,\n\nbad-date,tomorrow\n";

        let violations = rejected_violations(parse(text));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].row, Some(4));
        assert_eq!(violations[0].field, "dueAt");
    }

    #[test]
    fn reports_every_offending_row() {
        let long_title = "x".repeat(101);
        let text = format!("title,detail\n,a\nfine,b\n{long_title},c\n,d\n");

        let violations = rejected_violations(parse(&text));
        let rows: Vec<Option<usize>> = violations.iter().map(|violation| violation.row).collect();
        assert_eq!(rows, vec![Some(2), Some(4), Some(5)]);
    }

    #[test]
    fn columns_may_appear_in_any_order() {
        let text = "isComplete,title\ntrue,\"Milk, eggs\"\n";

        let records = parse(text).expect("upload should validate");
        assert_eq!(records[0].title, "Milk, eggs");
        assert!(records[0].is_complete);
    }

    #[test]
    fn short_rows_leave_missing_columns_absent() {
        let records = parse("title,detail,dueAt,isComplete\nOnly a title\n").expect("valid");
        assert_eq!(records[0].detail, None);
        assert!(!records[0].is_complete);
    }

    #[test]
    fn missing_header_is_a_parse_error() {
        assert!(matches!(parse(""), Err(BulkImportError::Parse { .. })));
        assert!(matches!(parse("\n\n"), Err(BulkImportError::Parse { .. })));
    }

    #[test]
    fn header_without_title_column_is_a_parse_error() {
        let error = parse("name,detail\nBuy milk,x\n").expect_err("no title column");
        match error {
            BulkImportError::Parse { message } => assert!(message.contains("'title'")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn enforces_row_limit() {
        let text = "title\na\nb\nc\n";
        assert!(matches!(
            parse_task_upload(text, 2),
            Err(BulkImportError::TooManyRows { limit: 2 })
        ));
        assert_eq!(parse_task_upload(text, 3).expect("at limit").len(), 3);
    }

    #[test]
    fn is_complete_literal_mapping() {
        assert!(parse_is_complete("true"));
        assert!(parse_is_complete("1"));
        assert!(!parse_is_complete(""));
        assert!(!parse_is_complete("false"));
        assert!(!parse_is_complete("TRUE"));
        assert!(!parse_is_complete("yes"));
    }

    proptest! {
        #[test]
        fn valid_rows_are_returned_in_order(titles in prop::collection::vec("[A-Za-z][A-Za-z0-9 ]{0,30}[A-Za-z0-9]", 0..40)) {
            let mut text = String::from("title,detail,dueAt,isComplete\n");
            for title in &titles {
                text.push_str(title);
                text.push_str(",,,\n");
            }

            let records = parse(&text).expect("generated rows are valid");
            let parsed: Vec<String> = records.into_iter().map(|record| record.title).collect();
            prop_assert_eq!(parsed, titles);
        }

        #[test]
        fn only_true_and_one_are_truthy(cell in "[a-zA-Z0-9]{0,6}") {
            prop_assert_eq!(parse_is_complete(&cell), cell == "true" || cell == "1");
        }

        #[test]
        fn any_invalid_row_rejects_everything(valid in 0usize..10, bad_at in 0usize..10) {
            let mut text = String::from("title,detail\n");
            let bad_index = bad_at.min(valid);
            for index in 0..=valid {
                if index == bad_index {
                    text.push_str(",missing title\n");
                } else {
                    text.push_str("task,\n");
                }
            }

            let result = parse(&text);
            prop_assert!(matches!(result, Err(BulkImportError::Rejected(_))));
        }
    }
}
