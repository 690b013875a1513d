//! Rebuild page lines from positioned glyphs.
//!
//! pdfium's plain text dump joins text runs with single spaces, so the
//! column gaps of a table are gone by the time [`crate::pipeline::tables`]
//! sees the line. This module works from glyph boxes (PDF user space, y
//! grows upwards) instead:
//!
//! ```text
//! glyphs ──sort by vertical centre──▶ lines (centre inside the line band)
//!        ──sort by left edge──────▶ gap < WORD_GAP     → nothing
//!                                   gap < COLUMN_GAP   → ' '
//!                                   otherwise          → '\t'
//! ```
//!
//! Gaps are measured in multiples of the line's median glyph width.

/// One character with its bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub ch: char,
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl Glyph {
    fn width(&self) -> f32 {
        self.right - self.left
    }

    fn height(&self) -> f32 {
        self.top - self.bottom
    }

    fn centre(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }
}

/// Gap, in median glyph widths, from which two glyphs belong to separate
/// words.
pub const WORD_GAP: f32 = 0.25;

/// Gap, in median glyph widths, from which two glyphs sit in separate
/// columns.
pub const COLUMN_GAP: f32 = 2.0;

struct Line {
    glyphs: Vec<Glyph>,
    top: f32,
    bottom: f32,
}

impl Line {
    fn new(g: Glyph) -> Self {
        Self {
            top: g.top,
            bottom: g.bottom,
            glyphs: vec![g],
        }
    }

    fn accepts(&self, g: &Glyph) -> bool {
        (self.bottom..=self.top).contains(&g.centre())
    }

    fn push(&mut self, g: Glyph) {
        self.top = self.top.max(g.top);
        self.bottom = self.bottom.min(g.bottom);
        self.glyphs.push(g);
    }
}

/// Lay `glyphs` out as text, top line first, one `\n` between lines and a
/// `\t` at every column gap.
///
/// Whitespace glyphs are dropped; spacing comes from geometry alone.
pub fn layout_lines(glyphs: &[Glyph]) -> String {
    let mut visible: Vec<Glyph> = glyphs
        .iter()
        .copied()
        .filter(|g| !g.ch.is_whitespace() && !g.ch.is_control() && g.height() > 0.0)
        .collect();
    visible.sort_by(|a, b| b.centre().total_cmp(&a.centre()));

    let mut lines: Vec<Line> = Vec::new();
    for g in visible {
        match lines.last_mut() {
            Some(line) if line.accepts(&g) => line.push(g),
            _ => lines.push(Line::new(g)),
        }
    }

    lines
        .into_iter()
        .map(|mut line| {
            line.glyphs.sort_by(|a, b| a.left.total_cmp(&b.left));
            render_line(&line.glyphs)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_line(glyphs: &[Glyph]) -> String {
    let unit = median_width(glyphs)
        .or_else(|| glyphs.first().map(|g| g.height() / 2.0))
        .unwrap_or(1.0)
        .max(f32::EPSILON);

    let mut out = String::with_capacity(glyphs.len() + 8);
    let mut right_edge: Option<f32> = None;
    for g in glyphs {
        if let Some(edge) = right_edge {
            let gap = (g.left - edge) / unit;
            if gap >= COLUMN_GAP {
                out.push('\t');
            } else if gap >= WORD_GAP {
                out.push(' ');
            }
        }
        out.push(g.ch);
        right_edge = Some(right_edge.map_or(g.right, |edge| edge.max(g.right)));
    }
    out
}

fn median_width(glyphs: &[Glyph]) -> Option<f32> {
    let mut widths: Vec<f32> = glyphs
        .iter()
        .map(Glyph::width)
        .filter(|w| *w > 0.0)
        .collect();
    if widths.is_empty() {
        return None;
    }
    widths.sort_by(f32::total_cmp);
    Some(widths[widths.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tables::detect_tables;

    const W: f32 = 5.0;

    /// `text` set in a 5pt-wide, 10pt-tall monospace run starting at `x`,
    /// with its baseline at `y`.
    fn word(text: &str, x: f32, y: f32) -> Vec<Glyph> {
        text.chars()
            .enumerate()
            .map(|(i, ch)| Glyph {
                ch,
                left: x + i as f32 * W,
                right: x + (i + 1) as f32 * W,
                bottom: y,
                top: y + 10.0,
            })
            .collect()
    }

    fn page() -> Vec<Glyph> {
        let mut glyphs = Vec::new();
        glyphs.extend(word("Sales", 50.0, 730.0));
        glyphs.extend(word("Report", 50.0 + 5.0 * W + 3.0, 730.0));
        for (y, left, right) in [
            (700.0, "Reference", "Amount"),
            (685.0, "A-1", "10.00"),
            (670.0, "A-2", "20.00"),
        ] {
            glyphs.extend(word(left, 50.0, y));
            glyphs.extend(word(right, 200.0, y));
        }
        // Content streams do not have to draw in reading order.
        glyphs.reverse();
        glyphs
    }

    #[test]
    fn column_gaps_become_tabs_and_word_gaps_spaces() {
        assert_eq!(
            layout_lines(&page()),
            "Sales Report\nReference\tAmount\nA-1\t10.00\nA-2\t20.00"
        );
    }

    #[test]
    fn laid_out_page_feeds_table_detection() {
        let tables = detect_tables(1, &layout_lines(&page()), 2, 2);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows[0], vec!["Reference", "Amount"]);
        assert_eq!(tables[0].rows[2], vec!["A-2", "20.00"]);
    }

    #[test]
    fn baseline_jitter_stays_on_one_line() {
        let mut glyphs = word("Total", 50.0, 500.0);
        glyphs.extend(word("99.00", 200.0, 501.5));
        assert_eq!(layout_lines(&glyphs), "Total\t99.00");
    }

    #[test]
    fn whitespace_glyphs_are_ignored() {
        let mut glyphs = word("Invoice", 50.0, 600.0);
        glyphs.push(Glyph {
            ch: ' ',
            left: 85.0,
            right: 85.0,
            bottom: 600.0,
            top: 600.0,
        });
        glyphs.extend(word("No:", 50.0 + 7.0 * W + 2.0, 600.0));
        assert_eq!(layout_lines(&glyphs), "Invoice No:");
    }

    #[test]
    fn no_glyphs_no_text() {
        assert_eq!(layout_lines(&[]), "");
    }
}
