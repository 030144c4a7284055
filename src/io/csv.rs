/*!
# CSV input and output

Reads headerless, comma-separated sampler traces and writes the derived moment
series and histograms for plotting tools. Enabled via the `csv` feature (on by
default).
*/

use csv::{ReaderBuilder, Trim, Writer};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{ParseError, Result};
use crate::histogram::Histogram2D;
use crate::stats::MomentSeries;
use crate::trace::{Trace, TraceParser};
use ndarray::Array2;

/**
Reads every record of a headerless numeric CSV table.

Record lengths may vary here; the [`TraceParser`] reports column-count
mismatches with the offending row. Row numbers are 0-based record indices.

# Examples

```rust
use bmc_diagnostics::io::csv::read_rows;

let rows = read_rows("0,1,0,0,0,1.5,2.5\n1,1,0,0,0,3.5,4.5\n".as_bytes())?;
assert_eq!(rows[1][5], 3.5);
# Ok::<(), bmc_diagnostics::Error>(())
```
*/
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<Vec<f64>>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let values = record
            .iter()
            .enumerate()
            .map(|(column, field)| {
                field.parse::<f64>().map_err(|_| ParseError::Malformed {
                    row,
                    column,
                    field: field.to_string(),
                })
            })
            .collect::<std::result::Result<Vec<f64>, ParseError>>()?;
        rows.push(values);
    }
    Ok(rows)
}

/// Reads and parses a trace file with the given layout.
pub fn read_trace_csv<P: AsRef<Path>>(path: P, parser: &TraceParser) -> Result<Trace> {
    let path = path.as_ref();
    let rows = read_rows(File::open(path)?)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "read trace table");
    parser.parse(&rows)
}

/**
Saves per-particle moment series, and optionally their mean, in long format.

The file has the header `particle,t,moment`; `t` is the 1-based prefix length
and the mean series uses `mean` in the particle column.
*/
pub fn save_moments_csv<P: AsRef<Path>>(
    series: &BTreeMap<u64, MomentSeries>,
    mean: Option<&[f64]>,
    path: P,
) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(path)?);
    wtr.write_record(["particle", "t", "moment"])?;
    for (id, values) in series {
        let id = id.to_string();
        for (t, v) in values.iter().enumerate() {
            wtr.write_record([id.as_str(), &(t + 1).to_string(), &v.to_string()])?;
        }
    }
    if let Some(mean) = mean {
        for (t, v) in mean.iter().enumerate() {
            wtr.write_record(["mean", &(t + 1).to_string(), &v.to_string()])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/**
Saves a histogram as one row per cell: `x_lo,x_hi,y_lo,y_hi,count`, plus an
`expected` column when the target overlay is supplied.
*/
pub fn save_histogram_csv<P: AsRef<Path>>(
    hist: &Histogram2D,
    expected: Option<&Array2<f64>>,
    path: P,
) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(path)?);
    let mut header = vec!["x_lo", "x_hi", "y_lo", "y_hi", "count"];
    if expected.is_some() {
        header.push("expected");
    }
    wtr.write_record(&header)?;

    let edges = &hist.edges;
    for ((i, j), count) in hist.counts.indexed_iter() {
        let mut row = vec![
            edges[i].to_string(),
            edges[i + 1].to_string(),
            edges[j].to_string(),
            edges[j + 1].to_string(),
            count.to_string(),
        ];
        if let Some(expected) = expected {
            row.push(expected[[i, j]].to_string());
        }
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::histogram::{build_2d, HistogramConfig};
    use csv::Reader;
    use std::fs;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_trace_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "0,1.0,0,1,0,1,2").unwrap();
        writeln!(file, "1,1.0,0,1,0,10,20").unwrap();
        writeln!(file, "0,1.0,0,2,0,3,4").unwrap();
        let parser = TraceParser::new(5, 7).unwrap();
        let trace = read_trace_csv(file.path(), &parser).unwrap();
        assert_eq!(trace.particle(0).unwrap(), &[vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(trace.particle(1).unwrap(), &[vec![10.0, 20.0]]);
    }

    #[test]
    fn malformed_field_reports_position() {
        let res = read_rows("0,1,2\n0,x,2\n".as_bytes());
        assert!(
            matches!(
                res,
                Err(Error::Parse(ParseError::Malformed { row: 1, column: 1, .. }))
            ),
            "{res:?}"
        );
    }

    #[test]
    fn short_row_becomes_column_count_error() {
        let rows = read_rows("0,0,0,0,0,1,2\n0,0,0,0,0,1\n".as_bytes()).unwrap();
        let res = TraceParser::new(5, 7).unwrap().parse(&rows);
        assert!(matches!(
            res,
            Err(Error::Parse(ParseError::ColumnCount { row: 1, .. }))
        ));
    }

    #[test]
    fn writes_moments_in_long_format() {
        let series: BTreeMap<u64, MomentSeries> =
            [(0, vec![1.0, 2.5]), (3, vec![2.0, 0.5])].into_iter().collect();
        let file = NamedTempFile::new().unwrap();
        save_moments_csv(&series, Some(&[1.5, 1.5]), file.path()).unwrap();
        let contents = fs::read_to_string(file.path()).unwrap();
        let expected = "\
particle,t,moment
0,1,1
0,2,2.5
3,1,2
3,2,0.5
mean,1,1.5
mean,2,1.5";
        assert_eq!(contents.trim(), expected);
    }

    #[test]
    fn writes_histogram_cells() {
        let config = HistogramConfig {
            range: [0.0, 2.0],
            bins: 2,
        };
        let hist = build_2d(&[[0.5, 1.5], [0.2, 1.9]], &config).unwrap();
        let expected = Array2::from_elem((2, 2), 0.5);
        let file = NamedTempFile::new().unwrap();
        save_histogram_csv(&hist, Some(&expected), file.path()).unwrap();

        let mut rdr = Reader::from_path(file.path()).unwrap();
        assert_eq!(&rdr.headers().unwrap()[5], "expected");
        let records: Vec<_> = rdr.records().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(records.len(), 4);
        // Row-major over (x_bin, y_bin): the (0, 1) cell holds both points.
        assert_eq!(&records[1][4], "2");
        assert_eq!(&records[1][2], "1");
    }
}
