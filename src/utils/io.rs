use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use thiserror::Error;

/// Error type for matrix file I/O
#[derive(Error, Debug)]
pub enum IoError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("IO error: {0}")]
    StdIo(#[from] std::io::Error),
    #[error("{path}:{line}: cannot parse {token:?} as a number")]
    Parse {
        path: PathBuf,
        line: usize,
        token: String,
    },
    #[error("{path}:{line}: row length differs from the first row")]
    Ragged { path: PathBuf, line: usize },
    #[error("No values in {0}")]
    Empty(PathBuf),
}

/// Reads a file to string with proper error handling
pub fn read_to_string(path: impl AsRef<Path>) -> Result<String, IoError> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IoError::FileNotFound(path.to_path_buf())
        } else {
            IoError::StdIo(e)
        }
    })
}

/// Writes string to file, creating parent directories if needed
pub fn write_string(path: impl AsRef<Path>, contents: impl AsRef<str>) -> Result<(), IoError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents.as_ref())?;
    Ok(())
}

fn parse_line(path: &Path, line: usize, text: &str) -> Result<Vec<f64>, IoError> {
    text.split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| IoError::Parse {
                path: path.to_path_buf(),
                line,
                token: token.to_string(),
            })
        })
        .collect()
}

/// Reads a whitespace-separated matrix, one row per line. Blank lines are
/// skipped; every remaining row must have the same length.
pub fn read_matrix(path: impl AsRef<Path>) -> Result<Array2<f64>, IoError> {
    let path = path.as_ref();
    let text = read_to_string(path)?;

    let mut values = Vec::new();
    let mut cols = None;
    let mut rows = 0;
    for (index, line) in text.lines().enumerate() {
        let row = parse_line(path, index + 1, line)?;
        if row.is_empty() {
            continue;
        }
        match cols {
            None => cols = Some(row.len()),
            Some(n) if n != row.len() => {
                return Err(IoError::Ragged {
                    path: path.to_path_buf(),
                    line: index + 1,
                })
            }
            Some(_) => {}
        }
        values.extend(row);
        rows += 1;
    }

    let cols = cols.ok_or_else(|| IoError::Empty(path.to_path_buf()))?;
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| IoError::StdIo(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Reads every whitespace-separated value of a file, regardless of line breaks.
pub fn read_vector(path: impl AsRef<Path>) -> Result<Array1<f64>, IoError> {
    let path = path.as_ref();
    let text = read_to_string(path)?;

    let mut values = Vec::new();
    for (index, line) in text.lines().enumerate() {
        values.extend(parse_line(path, index + 1, line)?);
    }
    if values.is_empty() {
        return Err(IoError::Empty(path.to_path_buf()));
    }
    Ok(Array1::from_vec(values))
}

/// Writes a matrix one row per line, values separated by single spaces.
pub fn write_matrix(path: impl AsRef<Path>, matrix: &Array2<f64>) -> Result<(), IoError> {
    let mut out = String::new();
    for row in matrix.rows() {
        let mut first = true;
        for value in row.iter() {
            if !first {
                out.push(' ');
            }
            first = false;
            // infallible for String
            let _ = write!(out, "{}", value);
        }
        out.push('\n');
    }
    write_string(path, out)
}

pub fn write_vector(path: impl AsRef<Path>, vector: &Array1<f64>) -> Result<(), IoError> {
    let line: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    write_string(path, line.join(" ") + "\n")
}
