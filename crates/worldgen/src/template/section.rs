//! Binary codec for one template section.
//!
//! Layout: an optional 3-byte header with the local x/y/z extents, followed by
//! little-endian `u16` palette indices in x-fastest, then z, then y order. A
//! section without a header (even length) or with an implausible one is a full
//! `edge`-cube.

/// Local extents of a decoded section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionDims {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl SectionDims {
    pub fn cube(edge: u32) -> Self {
        Self {
            x: edge,
            y: edge,
            z: edge,
        }
    }

    pub fn volume(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }

    /// Local cell of a linear index.
    pub fn cell(&self, index: usize) -> (u32, u32, u32) {
        let i = index as u32;
        let x = i % self.x;
        let z = (i / self.x) % self.z;
        let y = i / (self.x * self.z);
        (x, y, z)
    }

    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        ((y * self.z + z) * self.x + x) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSection {
    pub dims: SectionDims,
    /// Exactly `dims.volume()` entries. Cells the blob did not cover hold the
    /// transparent index.
    pub indices: Vec<u16>,
}

impl DecodedSection {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

fn header_plausible(blob: &[u8], edge: u32) -> Option<SectionDims> {
    if blob.len() < 3 || blob.len() % 2 == 0 {
        return None;
    }
    let dims = SectionDims {
        x: blob[0] as u32,
        y: blob[1] as u32,
        z: blob[2] as u32,
    };
    let in_range = |d: u32| d >= 1 && d <= edge;
    if !(in_range(dims.x) && in_range(dims.y) && in_range(dims.z)) {
        return None;
    }
    if (blob.len() - 3) / 2 > dims.volume() {
        return None;
    }
    Some(dims)
}

/// Decode a section blob. Never fails: malformed input degrades to a full cube
/// with missing trailing cells transparent.
pub fn decode_section(blob: &[u8], edge: u32, transparent: u16) -> DecodedSection {
    let (dims, payload) = match header_plausible(blob, edge) {
        Some(dims) => (dims, &blob[3..]),
        None if blob.len() % 2 == 1 => (SectionDims::cube(edge), &blob[3.min(blob.len())..]),
        None => (SectionDims::cube(edge), blob),
    };

    let volume = dims.volume();
    let mut indices: Vec<u16> = payload
        .chunks_exact(2)
        .take(volume)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    indices.resize(volume, transparent);

    DecodedSection { dims, indices }
}

/// Encode a section. The header is written only when `dims` is not the full
/// `edge`-cube.
pub fn encode_section(dims: SectionDims, indices: &[u16], edge: u32) -> Vec<u8> {
    let with_header = dims != SectionDims::cube(edge);
    let mut out = Vec::with_capacity(indices.len() * 2 + 3);
    if with_header {
        out.extend_from_slice(&[dims.x as u8, dims.y as u8, dims.z as u8]);
    }
    for &i in indices.iter().take(dims.volume()) {
        out.extend_from_slice(&i.to_le_bytes());
    }
    out
}
