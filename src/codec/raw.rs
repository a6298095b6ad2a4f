//! Raw L16 transform
//!
//! The raw wire format carries 16-bit samples in network (big-endian)
//! byte order.

/// Append `samples` to `out` in network byte order
pub fn to_network_order(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_be_bytes());
    }
}

/// Decode network-order bytes back into samples; a trailing odd byte is ignored
pub fn from_network_order(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_order_is_swapped() {
        let mut out = Vec::new();
        to_network_order(&[0x0102, -2], &mut out);
        assert_eq!(out, vec![0x01, 0x02, 0xff, 0xfe]);
        assert_eq!(from_network_order(&out), vec![0x0102, -2]);
    }

    #[test]
    fn test_appends() {
        let mut out = vec![9];
        to_network_order(&[1], &mut out);
        assert_eq!(out, vec![9, 0, 1]);
    }
}
