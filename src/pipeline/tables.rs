//! Table-structure detection over page text.
//!
//! Text layers of generated PDFs lay table cells out on one line separated by
//! tabs or runs of spaces; some renderers draw `|` column rules. A table is a
//! run of consecutive lines that split into the same number of cells.
//! Horizontal rule lines (`-----`, `=====`, `+---+`) inside a run are skipped
//! rather than ending it.

use crate::pipeline::extract::Table;
use once_cell::sync::Lazy;
use regex::Regex;

/// Two or more spaces, a tab, or a pipe with optional padding.
static CELL_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t+|\s*\|\s*| {2,}").unwrap());

static RULE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s\-=_+|:]{3,}$").unwrap());

/// Split one line into trimmed, non-empty cells.
pub fn split_cells(line: &str) -> Vec<String> {
    CELL_SPLIT
        .split(line.trim())
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_rule_line(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty() && RULE_LINE.is_match(t)
}

/// Detect tables on one page.
///
/// `page` is 1-indexed and is copied into every returned [`Table`].
pub fn detect_tables(page: usize, text: &str, min_rows: usize, min_columns: usize) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();

    let flush = |run: &mut Vec<Vec<String>>, tables: &mut Vec<Table>| {
        if run.len() >= min_rows {
            tables.push(Table {
                page,
                rows: std::mem::take(run),
            });
        } else {
            run.clear();
        }
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            flush(&mut run, &mut tables);
            continue;
        }
        if is_rule_line(line) {
            continue;
        }
        let cells = split_cells(line);
        if cells.len() < min_columns {
            flush(&mut run, &mut tables);
            continue;
        }
        if let Some(first) = run.first() {
            if first.len() != cells.len() {
                flush(&mut run, &mut tables);
            }
        }
        run.push(cells);
    }
    flush(&mut run, &mut tables);
    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_wide_gaps_tabs_and_pipes() {
        assert_eq!(split_cells("a  b\tc | d"), vec!["a", "b", "c", "d"]);
        assert_eq!(split_cells("Invoice No: 12345"), vec!["Invoice No: 12345"]);
    }

    #[test]
    fn detects_aligned_block() {
        let text = "\
REPORTE DE VENTAS

ID    Vendedor          Region    Ventas
----  ----------------  --------  ----------
001   Juan Perez        Norte     $45,000.00
002   Maria Garcia      Sur       $38,500.00

Total general: $83,500.00";
        let tables = detect_tables(1, text, 2, 2);
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(t.page, 1);
        assert_eq!(t.rows.len(), 3);
        assert_eq!(t.rows[0], vec!["ID", "Vendedor", "Region", "Ventas"]);
        assert_eq!(t.rows[2][1], "Maria Garcia");
    }

    #[test]
    fn column_count_change_ends_table() {
        let text = "\
Cantidad  Descripcion         Precio    Total
2         Laptop Dell         $15,000   $30,000
1         Monitor             $4,500    $4,500
Subtotal:    $34,500";
        let tables = detect_tables(2, text, 2, 2);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows.len(), 3);
    }

    #[test]
    fn single_row_is_not_a_table() {
        assert!(detect_tables(1, "Name    Value", 2, 2).is_empty());
    }

    #[test]
    fn prose_has_no_tables() {
        let text = "This is a paragraph of text.\nIt continues on another line.";
        assert!(detect_tables(1, text, 2, 2).is_empty());
    }
}
