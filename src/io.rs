//! Plain-text dataset loading and result writing.
//!
//! Datasets are whitespace-delimited decimal numbers. A vector file's length
//! defines the dimension; a matrix file holds at least `dim²` values in
//! row-major order (extra values are ignored). Results are written on a single
//! line, each value with six decimals followed by a space.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Parse every whitespace-delimited number in `reader`.
pub fn parse_values<R: BufRead>(reader: R) -> Result<Vec<f64>> {
    let mut values = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| Error::io("<input>", source))?;
        for token in line.split_whitespace() {
            let value = token.parse::<f64>().map_err(|_| Error::Parse {
                line: index + 1,
                token: token.to_string(),
            })?;
            values.push(value);
        }
    }
    Ok(values)
}

fn read_file(path: &Path) -> Result<Vec<f64>> {
    let file = File::open(path).map_err(|source| Error::io(path, source))?;
    parse_values(BufReader::new(file)).map_err(|err| match err {
        Error::Io { source, .. } => Error::io(path, source),
        other => other,
    })
}

/// Load a vector file. The returned length is the problem dimension.
pub fn load_vector(path: impl AsRef<Path>) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let values = read_file(path)?;
    tracing::debug!(path = %path.display(), dim = values.len(), "vector loaded");
    Ok(values)
}

/// Load the first `dim²` values of a matrix file.
pub fn load_matrix(path: impl AsRef<Path>, dim: usize) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let needed = dim
        .checked_mul(dim)
        .ok_or_else(|| Error::InvalidDimension(format!("{dim}² overflows usize")))?;
    let mut values = read_file(path)?;
    if values.len() < needed {
        return Err(Error::InvalidCount(format!(
            "{} holds {} values, a {dim}×{dim} matrix needs {needed}",
            path.display(),
            values.len()
        )));
    }
    if values.len() > needed {
        tracing::warn!(
            path = %path.display(),
            extra = values.len() - needed,
            "ignoring trailing matrix values"
        );
        values.truncate(needed);
    }
    Ok(values)
}

/// Format a result vector the way [`write_result`] stores it.
pub fn format_result(values: &[f64]) -> String {
    let mut line = String::with_capacity(values.len() * 12);
    for value in values {
        line.push_str(&format!("{value:.6} "));
    }
    line
}

/// Write `values` to `path` as one space-separated line.
pub fn write_result(path: impl AsRef<Path>, values: &[f64]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|source| Error::io(path, source))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(format_result(values).as_bytes())
        .and_then(|()| writer.flush())
        .map_err(|source| Error::io(path, source))?;
    tracing::debug!(path = %path.display(), len = values.len(), "result written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_mixed_whitespace() {
        let values = parse_values(Cursor::new("1 2.5\n\t-3e2   4\n\n")).unwrap();
        assert_eq!(values, vec![1.0, 2.5, -300.0, 4.0]);
    }

    #[test]
    fn reports_line_of_bad_token() {
        match parse_values(Cursor::new("1 2\n3 x4\n")) {
            Err(Error::Parse { line, token }) => {
                assert_eq!(line, 2);
                assert_eq!(token, "x4");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn result_line_format() {
        assert_eq!(format_result(&[1.0, 2.5, -0.125]), "1.000000 2.500000 -0.125000 ");
        assert_eq!(format_result(&[]), "");
    }

    #[test]
    fn files_round_trip() {
        let dir = std::env::temp_dir().join(format!("ferromv-io-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let vec_path = dir.join("vec.txt");
        let mat_path = dir.join("mat.txt");
        let out_path = dir.join("Result.txt");
        std::fs::write(&vec_path, "1 1\n").unwrap();
        std::fs::write(&mat_path, "1 2\n3 4\n99\n").unwrap();

        let vector = load_vector(&vec_path).unwrap();
        assert_eq!(vector.len(), 2);
        assert_eq!(load_matrix(&mat_path, 2).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(matches!(load_matrix(&mat_path, 3), Err(Error::InvalidCount(_))));

        write_result(&out_path, &[3.0, 7.0]).unwrap();
        assert_eq!(
            std::fs::read_to_string(&out_path).unwrap(),
            "3.000000 7.000000 "
        );

        assert!(matches!(
            load_vector(dir.join("missing.txt")),
            Err(Error::Io { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
