use std::path::Path;

pub mod container;
pub mod driver;
pub mod error;
pub mod gpu;
pub mod options;
pub mod passes;

pub use driver::{sample, PipelineDriver, Stage};
pub use error::{ErrorKind, IblError, Result};
pub use options::{ContainerVersion, OutputFormat, SampleOptions};

pub fn align_to_256(n: usize) -> usize {
    (n + 255) & !255
}

/// Copies `row_size`-byte rows into rows of `padded_row_size` bytes.
pub fn pad_rows(data: &[u8], row_size: usize, padded_row_size: usize) -> Vec<u8> {
    if row_size == padded_row_size {
        return data.to_vec();
    }
    let rows = data.len() / row_size;
    let mut padded = vec![0u8; padded_row_size * rows];
    for (src, dst) in data
        .chunks_exact(row_size)
        .zip(padded.chunks_exact_mut(padded_row_size))
    {
        dst[..row_size].copy_from_slice(src);
    }
    padded
}

/// Inverse of [`pad_rows`].
pub fn strip_row_padding(data: &[u8], row_size: usize, padded_row_size: usize, rows: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(row_size * rows);
    for row in data.chunks(padded_row_size).take(rows) {
        out.extend_from_slice(&row[..row_size]);
    }
    out
}

pub fn strip_extension(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str());

    match (path.parent(), stem) {
        (Some(parent), Some(stem)) => parent.join(stem).to_string_lossy().into_owned(),
        (None, Some(stem)) => stem.to_string(),
        _ => path.to_string_lossy().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up_to_256() {
        assert_eq!(align_to_256(0), 0);
        assert_eq!(align_to_256(1), 256);
        assert_eq!(align_to_256(256), 256);
        assert_eq!(align_to_256(257), 512);
    }

    #[test]
    fn padding_round_trips() {
        let data: Vec<u8> = (0..24).collect();
        let padded = pad_rows(&data, 8, 256);
        assert_eq!(padded.len(), 3 * 256);
        assert_eq!(&padded[256..264], &data[8..16]);
        assert_eq!(strip_row_padding(&padded, 8, 256, 3), data);
    }

    #[test]
    fn strip_extension_keeps_parent() {
        assert_eq!(strip_extension(Path::new("assets/sky.hdr")), "assets/sky");
        assert_eq!(strip_extension(Path::new("sky.hdr")), "sky");
    }
}
