//! Rectangular remap of the triangular face lattice.
//!
//! The triangular row layout can be looped as a dense rectangle: the short
//! upper rows are folded onto the tail of the long lower rows. For a lattice
//! of width `w` the rectangle is `w x ((w+1)/2)` when `w` is odd and
//! `(w+1) x (w/2)` when `w` is even, both holding exactly `w (w+1) / 2`
//! entries. Looping the rectangle and remapping each `(col, row)` with
//! [`unwrap_col`] / [`unwrap_row`] visits every triangle point exactly once,
//! which keeps inner loops branch-free and trip-count uniform.
//!
//! ```text
//! 14
//! 12 13
//! 09 10 11        <-->   09 10 11 12 13
//! 05 06 07 08            05 06 07 08 14
//! 00 01 02 03 04         00 01 02 03 04
//! ```

/// Number of columns of the rectangular loop domain for a triangle of
/// row-0 width `width`.
#[inline]
pub const fn unwrap_num_cols(width: usize) -> usize {
    if width % 2 == 0 {
        width + 1
    } else {
        width
    }
}

/// Number of rows of the rectangular loop domain.
#[inline]
pub const fn unwrap_num_rows(width: usize) -> usize {
    if width % 2 == 0 {
        width / 2
    } else {
        (width + 1) / 2
    }
}

/// Triangle column of rectangle entry `(col, row)`.
#[inline]
pub const fn unwrap_col(width: usize, col: usize, row: usize) -> usize {
    if col >= width - row {
        col - (width - row)
    } else {
        col
    }
}

/// Triangle row of rectangle entry `(col, row)`.
#[inline]
pub const fn unwrap_row(width: usize, col: usize, row: usize) -> usize {
    if col >= width - row {
        if width % 2 == 0 {
            (width - 1) - row
        } else {
            width - row
        }
    } else {
        row
    }
}
