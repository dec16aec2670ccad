use std::ops::Range;

use line_col::LineColLookup;

/// A range representing a location in the original template source
pub type Span = Range<usize>;

/// A span representing no location in the original template source
pub const NO_SPAN: Span = 0..0;

/// Map a byte index to a position (line, column)
///
/// Line and column are zero based. Indexes past the end of the source
/// report the position of the last character.
pub fn index_to_position(source: &str, index: usize) -> (usize, usize) {
    let lookup = LineColLookup::new(source);

    let (line, col) = lookup.get(index.min(source.len()));

    (line - 1, col - 1)
}
