//! API operations concerning the records in a table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{ApiRequest, DataResponse, encode_segment};

/// The field values of a record, keyed by field name. Airtable fields are
/// defined per base, so values are left as dynamic JSON.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// A record (row) in a table.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct Record {
    /// The record ID (`rec...`). Empty for records that haven't been created
    /// yet.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// The cell values.
    #[serde(default)]
    pub fields: Fields,
    /// When the record was created.
    #[serde(
        rename = "createdTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_time: Option<DateTime<Utc>>,
}

impl Record {
    /// A record with the given fields that hasn't been created yet.
    pub fn new(fields: Fields) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }
}

/// One page of records from a table.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct Table {
    /// The name of the table. Not part of the API response; filled in by
    /// [crate::TableHandle].
    #[serde(skip_deserializing, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// The records, in the order the API returned them.
    #[serde(default)]
    pub records: Vec<Record>,
    /// The cursor for the next page of records, if there is one. Pass it back
    /// via [ListRecordsParams::offset] to fetch that page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
}

impl DataResponse for Table {}

/// The direction of a sort.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// A sort on a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sort {
    /// The field to sort by.
    pub field: String,
    /// The direction to sort in.
    pub direction: SortDirection,
}

/// Indicates that a sort specification could not be parsed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid sort: {0}")]
pub struct InvalidSort(String);

impl std::str::FromStr for Sort {
    type Err = InvalidSort;

    /// Parses `field`, `field:asc` or `field:desc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, direction) = match s.rsplit_once(':') {
            Some((field, "asc")) => (field, SortDirection::Asc),
            Some((field, "desc")) => (field, SortDirection::Desc),
            _ => (s, SortDirection::Asc),
        };

        if field.is_empty() {
            return Err(InvalidSort(s.to_owned()));
        }

        Ok(Sort {
            field: field.to_owned(),
            direction,
        })
    }
}

/// How cell values are formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellFormat {
    /// Values are returned as JSON (the default).
    Json,
    /// Values are returned as strings. Requires `time_zone` and
    /// `user_locale`.
    String,
}

/// Filtering, sorting and paging options for listing records.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecordsParams {
    /// Only return these fields.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// Only return records for which this formula evaluates truthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_by_formula: Option<String>,
    /// The maximum number of records to return across all pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_records: Option<u32>,
    /// The number of records per page (at most 100).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// Sort order, most significant first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Sort>,
    /// Only return records in this view, in its order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    /// How to format cell values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_format: Option<CellFormat>,
    /// The time zone for string-formatted dates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    /// The locale for string-formatted values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_locale: Option<String>,
    /// The cursor returned with a previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
}

/// List the records in a table.
#[derive(Debug, Clone)]
pub struct ListRecords<'a> {
    /// The table name or ID.
    pub table: &'a str,

    /// Filtering, sorting and paging options.
    pub params: Option<&'a ListRecordsParams>,
}

impl ApiRequest for ListRecords<'_> {
    type Response = Table;

    fn path(&self) -> String {
        encode_segment(self.table)
    }

    fn query(&self) -> Option<impl Serialize> {
        self.params
    }
}
