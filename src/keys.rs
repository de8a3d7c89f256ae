//! Key encoding for the registry databases.
//!
//! Every key is a sequence of length-prefixed parts, `[len][bytes]` repeated,
//! with the domain id always first. Because each part carries its own length
//! there is no delimiter to escape, and a prefix built from whole parts can
//! never match inside a longer part (`"lab"` never shadows `"labx"`).

/// Largest encodable part. The length prefix is a single byte.
pub const MAX_PART_LEN: usize = 255;

/// Encode `parts` into one key.
///
/// ```
/// let key = entitle::keys::build_key(&["lab", "proj-1", "read"]);
/// assert_eq!(entitle::keys::parse_key(&key), vec!["lab", "proj-1", "read"]);
/// ```
pub fn build_key(parts: &[&str]) -> Vec<u8> {
    parts.iter().fold(
        Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum()),
        |mut key, part| {
            debug_assert!(part.len() <= MAX_PART_LEN);
            key.push(part.len() as u8);
            key.extend_from_slice(part.as_bytes());
            key
        },
    )
}

/// Encode a partial key for prefix scans. Identical encoding to
/// [`build_key`]; the separate name marks scan call sites.
#[inline]
pub fn build_prefix(parts: &[&str]) -> Vec<u8> {
    build_key(parts)
}

/// Iterator over the parts of an encoded key.
///
/// Stops at the first malformed or non-UTF-8 part; keys written through
/// [`build_key`] always decode fully.
struct Parts<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Parts<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let (&len, tail) = self.rest.split_first()?;
        if tail.len() < len as usize {
            self.rest = &[];
            return None;
        }
        let (part, rest) = tail.split_at(len as usize);
        self.rest = rest;
        std::str::from_utf8(part).ok()
    }
}

/// Decode a key back into its parts.
pub fn parse_key(bytes: &[u8]) -> Vec<&str> {
    Parts { rest: bytes }.collect()
}

/// Decode only the `n`th part of a key.
#[inline]
pub fn get_part(bytes: &[u8], n: usize) -> Option<&str> {
    Parts { rest: bytes }.nth(n)
}
