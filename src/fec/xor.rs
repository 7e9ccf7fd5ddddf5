//! XOR parity over variable-length payloads.

/// XOR `src` into `dst` over their common prefix.
///
/// Bytes of `dst` past the end of `src` are left untouched, which is the same
/// as XOR-ing with `src` zero-extended to the length of `dst`.
///
/// # Example
///
/// ```
/// use smpte2022_fec::fec::xor_into;
///
/// let mut parity = vec![0u8; 4];
/// xor_into(&mut parity, &[0x0f, 0xf0]);
/// xor_into(&mut parity, &[0xff, 0xff, 0x01, 0x02]);
/// assert_eq!(parity, vec![0xf0, 0x0f, 0x01, 0x02]);
/// ```
pub fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_is_self_inverse() {
        let a = b"media packet one".to_vec();
        let b = b"two".to_vec();

        let mut parity = vec![0u8; a.len()];
        xor_into(&mut parity, &a);
        xor_into(&mut parity, &b);

        let mut recovered = parity.clone();
        xor_into(&mut recovered, &b);
        assert_eq!(recovered, a);
    }

    #[test]
    fn test_longer_source_is_truncated() {
        let mut dst = vec![0u8; 2];
        xor_into(&mut dst, &[1, 2, 3, 4]);
        assert_eq!(dst, vec![1, 2]);
    }

    #[test]
    fn test_empty_source_leaves_destination() {
        let mut dst = vec![7u8; 3];
        xor_into(&mut dst, &[]);
        assert_eq!(dst, vec![7, 7, 7]);
    }
}
