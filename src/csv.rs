use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Fee;
use crate::collaborators::{PaymentInput, VerificationInput};
use crate::fee::FeeParseError;
use crate::model::{RequesterId, ResourceId, Utilization};

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized request type '{kind}'")]
    UnrecognizedType { line: usize, kind: String },

    #[error("line {line}: {kind} missing {field}")]
    MissingField {
        line: usize,
        kind: &'static str,
        field: &'static str,
    },

    #[error("line {line}: {source}")]
    InvalidFee { line: usize, source: FeeParseError },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush csv: {0}")]
    Flush(#[from] io::Error),
}

/// One row of a request batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Enroll {
        requester: RequesterId,
        resource: ResourceId,
        verification: VerificationInput,
        payment: PaymentInput,
    },
    Withdraw {
        requester: RequesterId,
    },
}

#[derive(Debug, Deserialize)]
struct ResourceRow {
    resource: String,
    capacity: u32,
}

#[derive(Debug, Deserialize)]
struct RequestRow {
    r#type: String,
    requester: String,
    resource: Option<String>,
    documents: Option<String>,
    amount: Option<String>,
    method: Option<String>,
}

#[derive(Debug, Serialize)]
struct UtilizationRow<'a> {
    resource: &'a str,
    capacity: u32,
    confirmed: u32,
    tentative: u32,
    available: u32,
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, CsvError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })
}

/// Read `resource,capacity` rows from a csv file
pub fn read_resources(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<(ResourceId, u32), CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<ResourceRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            Ok((ResourceId::new(row.resource), row.capacity))
        }))
}

/// Read enroll and withdraw requests from a csv file
pub fn read_requests(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Request, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<RequestRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2;
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_request(line, row)
        }))
}

fn parse_request(line: usize, row: RequestRow) -> Result<Request, CsvError> {
    let requester = RequesterId::new(row.requester);
    match row.r#type.as_str() {
        "enroll" => {
            let missing = |field| CsvError::MissingField {
                line,
                kind: "enroll",
                field,
            };
            let resource = non_empty(row.resource).ok_or_else(|| missing("resource"))?;
            let amount = non_empty(row.amount).ok_or_else(|| missing("amount"))?;
            let method = non_empty(row.method).ok_or_else(|| missing("method"))?;
            let amount: Fee = amount
                .parse()
                .map_err(|source| CsvError::InvalidFee { line, source })?;
            let documents = row.documents.unwrap_or_default();

            Ok(Request::Enroll {
                requester,
                resource: ResourceId::new(resource),
                verification: VerificationInput::new(
                    documents.split(';').map(str::trim).filter(|d| !d.is_empty()),
                ),
                payment: PaymentInput::new(amount, method),
            })
        }
        "withdraw" => Ok(Request::Withdraw { requester }),
        other => Err(CsvError::UnrecognizedType {
            line,
            kind: other.to_string(),
        }),
    }
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|f| !f.is_empty())
}

/// Write resource utilization rows in csv format
pub fn write_utilization<'a>(
    writer: impl io::Write,
    rows: impl IntoIterator<Item = &'a (ResourceId, Utilization)>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for (resource, util) in rows {
        writer.serialize(UtilizationRow {
            resource: resource.as_str(),
            capacity: util.capacity,
            confirmed: util.confirmed,
            tentative: util.tentative,
            available: util.available(),
        })?;
    }

    writer.flush()?;
    Ok(())
}
