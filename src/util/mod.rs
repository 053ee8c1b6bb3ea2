//! Utility code that doesn't belong anywhere specific.

pub mod vec_map;

/// Hex display of raw bytes, truncated to a maximum length.
pub struct Bytes<'src> {
    pub partial: bool,
    pub bytes: &'src [u8],
}

impl<'src> Bytes<'src> {
    pub fn first(max: usize, bytes: &'src [u8]) -> Self {
        if bytes.len() > max {
            Bytes {
                partial: true,
                bytes: &bytes[0..max],
            }
        } else {
            Bytes {
                partial: false,
                bytes,
            }
        }
    }
}

impl std::fmt::Display for Bytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:02X?}", self.bytes)?;
        if self.partial {
            write!(f, "...")
        } else {
            Ok(())
        }
    }
}
