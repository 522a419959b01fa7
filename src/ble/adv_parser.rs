//! Advertising data (AD structure) parsing.
//!
//! Raw advertisement / scan-response payloads are a sequence of
//! `[len][type][data; len - 1]` records.

/// AD type: Shortened Local Name.
pub const AD_TYPE_SHORT_NAME: u8 = 0x08;
/// AD type: Complete Local Name.
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;

/// Iterator over the `(type, data)` records of an advertising payload.
///
/// Stops at the first zero-length record or at a record that would run past
/// the end of the buffer.
#[derive(Clone)]
pub struct AdStructures<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AdStructures<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.data.get(self.pos)? as usize;
        if len == 0 || self.pos + len >= self.data.len() {
            self.pos = self.data.len();
            return None;
        }
        let ad_type = self.data[self.pos + 1];
        let payload = &self.data[self.pos + 2..self.pos + 1 + len];
        self.pos += len + 1;
        Some((ad_type, payload))
    }
}

/// Extract the advertised local name, if any.
///
/// The complete name wins over a shortened one when both are present.
pub fn local_name(data: &[u8]) -> Option<&[u8]> {
    let mut short = None;
    for (ad_type, payload) in AdStructures::new(data) {
        match ad_type {
            AD_TYPE_COMPLETE_NAME if !payload.is_empty() => return Some(payload),
            AD_TYPE_SHORT_NAME if !payload.is_empty() => short = short.or(Some(payload)),
            _ => {}
        }
    }
    short
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_complete_local_name() {
        // AD structure: len=9, type=0x09 (Complete Local Name), "Keyboard"
        let ad_data = [
            0x09, 0x09, // len=9, type=0x09
            b'K', b'e', b'y', b'b', b'o', b'a', b'r', b'd',
        ];
        assert_eq!(local_name(&ad_data), Some(&b"Keyboard"[..]));
    }

    #[test]
    fn extract_shortened_local_name() {
        let ad_data = [
            0x05, 0x08, // len=5, type=0x08
            b'B', b'T', b' ', b'K',
        ];
        assert_eq!(local_name(&ad_data), Some(&b"BT K"[..]));
    }

    #[test]
    fn complete_name_preferred_over_short() {
        let ad_data = [
            0x03, 0x08, b'T', b'h', // short "Th"
            0x02, 0x01, 0x06, // flags
            0x06, 0x09, b'T', b'h', b'e', b'r', b'm', // complete "Therm"
        ];
        assert_eq!(local_name(&ad_data), Some(&b"Therm"[..]));
    }

    #[test]
    fn no_name_in_advertisement() {
        // Only flags, no name
        let ad_data = [
            0x02, 0x01, 0x06, // Flags: LE General Discoverable
        ];
        assert_eq!(local_name(&ad_data), None);
    }

    #[test]
    fn empty_advertisement_data() {
        assert_eq!(local_name(&[]), None);
        assert_eq!(AdStructures::new(&[]).count(), 0);
    }

    #[test]
    fn malformed_lengths_stop_parsing() {
        assert_eq!(AdStructures::new(&[0x00, 0x09, b'A']).count(), 0);
        // Claims 5 bytes but only 2 follow
        assert_eq!(local_name(&[0x05, 0x09, b'A', b'B']), None);
    }
}
