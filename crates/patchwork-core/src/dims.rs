use std::fmt;

// Dims4: Extents of a cube
//
// Every cube in patchwork is four-dimensional:
//   R: rows of one feature map
//   C: columns of one feature map
//   D: depth (feature maps per batch element)
//   B: batch
//
// A lowered matrix is also a Dims4: (K*K*D, outR*outC*B, 1, 1).
// How the four extents linearize into memory is decided by the LayoutType,
// not by Dims4 itself.

/// Four extents (rows, columns, depth, batch) of a cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims4 {
    pub r: usize,
    pub c: usize,
    pub d: usize,
    pub b: usize,
}

impl Dims4 {
    pub const fn new(r: usize, c: usize, d: usize, b: usize) -> Self {
        Dims4 { r, c, d, b }
    }

    /// A 2D matrix of `rows x cols`, stored as a cube with D = B = 1.
    pub const fn matrix(rows: usize, cols: usize) -> Self {
        Dims4::new(rows, cols, 1, 1)
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.r * self.c * self.d * self.b
    }

    /// Number of elements in one R x C feature map.
    pub fn map_len(&self) -> usize {
        self.r * self.c
    }

    pub fn as_array(&self) -> [usize; 4] {
        [self.r, self.c, self.d, self.b]
    }
}

impl fmt::Display for Dims4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[R={}, C={}, D={}, B={}]", self.r, self.c, self.d, self.b)
    }
}

impl From<(usize, usize, usize, usize)> for Dims4 {
    fn from((r, c, d, b): (usize, usize, usize, usize)) -> Self {
        Dims4::new(r, c, d, b)
    }
}

impl From<(usize, usize)> for Dims4 {
    fn from((r, c): (usize, usize)) -> Self {
        Dims4::matrix(r, c)
    }
}

impl From<[usize; 4]> for Dims4 {
    fn from(a: [usize; 4]) -> Self {
        Dims4::new(a[0], a[1], a[2], a[3])
    }
}
