use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::core::data::sparse::SparseColumns;
use crate::error::{Result, ScError};
use crate::pipeline::dataset::Dataset;

/// Barcode file expected inside a matrix directory.
pub const BARCODES_FILE: &str = "barcodes.tsv";
/// Feature file expected inside a matrix directory.
pub const FEATURES_FILE: &str = "features.tsv";
/// MatrixMarket triplet file expected inside a matrix directory.
pub const MATRIX_FILE: &str = "matrix.mtx";

/////////
// MTX //
/////////

/// Dimensions declared by the MatrixMarket size line.
///
/// ### Fields
///
/// * `total_genes` - Number of genes (rows) in the header.
/// * `total_cells` - Number of cells (columns) in the header.
/// * `total_entries` - Number of triplet entries in the header.
#[derive(Debug, Clone)]
struct MtxHeader {
    total_genes: usize,
    total_cells: usize,
    total_entries: usize,
}

/// Read a 10x-style matrix directory into a [`Dataset`].
///
/// The directory must contain a barcode list (one cell identifier per
/// line), a feature list (gene identifier first, optional symbol/type
/// columns after a tab) and a MatrixMarket triplet file with genes in rows
/// and cells in columns, 1-based indices.
///
/// ### Params
///
/// * `dir` - Path to the matrix directory.
///
/// ### Returns
///
/// The loaded dataset with genes and cells in input order.
/// `ScError::NotFound` when the directory or one of the three files is
/// missing, `ScError::Format` when the triplet data is malformed or the
/// dimensions disagree with the barcode/feature lists.
pub fn read_10x_dir<P: AsRef<Path>>(dir: P) -> Result<Dataset> {
    let dir = dir.as_ref();

    if !dir.is_dir() {
        return Err(ScError::NotFound(format!(
            "matrix directory '{}'",
            dir.display()
        )));
    }

    let cell_ids = read_id_column(&dir.join(BARCODES_FILE))?;
    let gene_ids = read_id_column(&dir.join(FEATURES_FILE))?;

    let counts = read_mtx(&dir.join(MATRIX_FILE), gene_ids.len(), cell_ids.len())?;

    Dataset::new(counts, gene_ids, cell_ids)
}

/// Read the first tab-separated column of a line-based identifier file.
fn read_id_column(path: &Path) -> Result<Vec<String>> {
    let file = open_input(path)?;
    let reader = BufReader::new(file);

    let mut ids = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }
        let id = trimmed.split('\t').next().unwrap_or(trimmed);
        ids.push(id.to_string());
    }

    if ids.is_empty() {
        return Err(ScError::Format(format!(
            "'{}' contains no identifiers",
            path.display()
        )));
    }

    Ok(ids)
}

/// Parse the triplet file against the known gene and cell counts.
fn read_mtx(path: &Path, n_genes: usize, n_cells: usize) -> Result<SparseColumns<u32>> {
    let file = open_input(path)?;
    let mut reader = BufReader::new(file);

    let header = parse_header(&mut reader, path)?;

    if header.total_genes != n_genes || header.total_cells != n_cells {
        return Err(ScError::Format(format!(
            "matrix header declares {} genes x {} cells, but the feature/barcode lists hold {} x {}",
            header.total_genes, header.total_cells, n_genes, n_cells
        )));
    }

    let mut triplets: Vec<(usize, usize, u32)> = Vec::with_capacity(header.total_entries);
    let mut line_buffer = Vec::with_capacity(64);

    while {
        line_buffer.clear();
        reader.read_until(b'\n', &mut line_buffer)? > 0
    } {
        while matches!(line_buffer.last(), Some(&b'\n') | Some(&b'\r')) {
            line_buffer.pop();
        }
        if line_buffer.is_empty() {
            continue;
        }

        let (gene, cell, value) = parse_triplet(&line_buffer).ok_or_else(|| {
            ScError::Format(format!(
                "malformed triplet line in '{}': {:?}",
                path.display(),
                String::from_utf8_lossy(&line_buffer)
            ))
        })?;

        if gene == 0 || cell == 0 || gene > n_genes || cell > n_cells {
            return Err(ScError::Format(format!(
                "triplet ({gene}, {cell}) outside the declared {n_genes} x {n_cells} matrix"
            )));
        }

        triplets.push((gene - 1, cell - 1, value));
    }

    if triplets.len() != header.total_entries {
        return Err(ScError::Format(format!(
            "matrix header declares {} entries, found {}",
            header.total_entries,
            triplets.len()
        )));
    }

    SparseColumns::from_triplets(n_genes, n_cells, &triplets)
}

/// Skip `%` comment lines and parse the size line.
fn parse_header(reader: &mut BufReader<File>, path: &Path) -> Result<MtxHeader> {
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(ScError::Format(format!(
                "'{}' ended before the size line",
                path.display()
            )));
        }
        if !line.starts_with('%') && !line.trim().is_empty() {
            break;
        }
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(ScError::Format(format!(
            "invalid size line in '{}': {:?}",
            path.display(),
            line.trim_end()
        )));
    }

    let parse = |s: &str, what: &str| -> Result<usize> {
        s.parse()
            .map_err(|_| ScError::Format(format!("invalid {what} in '{}'", path.display())))
    };

    Ok(MtxHeader {
        total_genes: parse(parts[0], "gene count")?,
        total_cells: parse(parts[1], "cell count")?,
        total_entries: parse(parts[2], "entry count")?,
    })
}

fn open_input(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ScError::NotFound(format!("input file '{}'", path.display()))
        } else {
            ScError::Io(e)
        }
    })
}

/////////////
// Helpers //
/////////////

/// Parse one `gene cell value` triplet line from raw bytes.
///
/// Returns `None` for anything that is not three whitespace-separated
/// non-negative integers.
#[inline]
fn parse_triplet(line: &[u8]) -> Option<(usize, usize, u32)> {
    let mut fields = [0_u64; 3];
    let mut field = 0_usize;
    let mut i = 0_usize;

    while i < line.len() {
        while i < line.len() && (line[i] == b' ' || line[i] == b'\t') {
            i += 1;
        }
        if i == line.len() {
            break;
        }
        if field == 3 || !line[i].is_ascii_digit() {
            return None;
        }

        let mut value = 0_u64;
        while i < line.len() && line[i].is_ascii_digit() {
            value = value * 10 + (line[i] - b'0') as u64;
            if value > u32::MAX as u64 {
                return None;
            }
            i += 1;
        }
        if i < line.len() && line[i] != b' ' && line[i] != b'\t' {
            return None;
        }

        fields[field] = value;
        field += 1;
    }

    if field != 3 {
        return None;
    }

    Some((fields[0] as usize, fields[1] as usize, fields[2] as u32))
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_dir(barcodes: &str, features: &str, matrix: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in [
            (BARCODES_FILE, barcodes),
            (FEATURES_FILE, features),
            (MATRIX_FILE, matrix),
        ] {
            let mut f = File::create(dir.path().join(name)).unwrap();
            f.write_all(content.as_bytes()).unwrap();
        }
        dir
    }

    fn valid_dir() -> TempDir {
        write_dir(
            "AAAC-1\nAAAG-1\nAAAT-1\n",
            "ENSG01\tMT-CO1\tGene Expression\nENSG02\tACTB\tGene Expression\n",
            "%%MatrixMarket matrix coordinate integer general\n% comment\n2 3 4\n1 1 5\n2 1 1\n1 3 2\n2 3 7\n",
        )
    }

    #[test]
    fn test_read_valid_directory() {
        let dir = valid_dir();
        let ds = read_10x_dir(dir.path()).unwrap();

        assert_eq!(ds.n_genes(), 2);
        assert_eq!(ds.n_cells(), 3);
        assert_eq!(ds.cell_ids, vec!["AAAC-1", "AAAG-1", "AAAT-1"]);
        assert_eq!(ds.gene_ids, vec!["ENSG01", "ENSG02"]);
        assert_eq!(ds.counts.col_sums(), vec![6.0, 0.0, 9.0]);
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        let res = read_10x_dir(dir.path().join("does-not-exist"));
        assert!(matches!(res, Err(ScError::NotFound(_))));
    }

    #[test]
    fn test_missing_matrix_file_is_not_found() {
        let dir = valid_dir();
        std::fs::remove_file(dir.path().join(MATRIX_FILE)).unwrap();

        let res = read_10x_dir(dir.path());
        assert!(matches!(res, Err(ScError::NotFound(_))));
    }

    #[test]
    fn test_dimension_mismatch_is_format_error() {
        let dir = write_dir(
            "AAAC-1\nAAAG-1\n",
            "ENSG01\nENSG02\n",
            "%%MatrixMarket matrix coordinate integer general\n2 3 1\n1 1 5\n",
        );

        let res = read_10x_dir(dir.path());
        assert!(matches!(res, Err(ScError::Format(_))));
    }

    #[test]
    fn test_entry_count_mismatch_is_format_error() {
        let dir = write_dir(
            "AAAC-1\n",
            "ENSG01\n",
            "%%MatrixMarket matrix coordinate integer general\n1 1 2\n1 1 5\n",
        );

        let res = read_10x_dir(dir.path());
        assert!(matches!(res, Err(ScError::Format(_))));
    }

    #[test]
    fn test_out_of_range_entry_is_format_error() {
        let dir = write_dir(
            "AAAC-1\n",
            "ENSG01\n",
            "%%MatrixMarket matrix coordinate integer general\n1 1 1\n2 1 5\n",
        );

        let res = read_10x_dir(dir.path());
        assert!(matches!(res, Err(ScError::Format(_))));
    }

    #[test]
    fn test_parse_triplet() {
        assert_eq!(parse_triplet(b"12 3 4"), Some((12, 3, 4)));
        assert_eq!(parse_triplet(b"1\t2\t3"), Some((1, 2, 3)));
        assert_eq!(parse_triplet(b"1 2"), None);
        assert_eq!(parse_triplet(b"1 2 3 4"), None);
        assert_eq!(parse_triplet(b"a b c"), None);
    }
}
