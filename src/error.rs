use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("unable to open trace file {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read trace line {line}")]
    Read {
        line: usize,
        #[source]
        source: io::Error,
    },
    #[error("trace line {line} exceeds the {limit} byte line limit")]
    LineTooLong { line: usize, limit: usize },
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("template rendering failed: {0}")]
    Template(String),
    #[error("trace line {line}: unsupported access size of {size} bytes")]
    UnsupportedAccessSize { line: usize, size: u32 },
}

impl From<std::fmt::Error> for GenerateError {
    fn from(err: std::fmt::Error) -> Self {
        GenerateError::Template(err.to_string())
    }
}
