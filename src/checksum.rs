use crc32fast::Hasher;

/// Incremental CRC-32 (IEEE, reflected) accumulator.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.hasher.reset();
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Current checksum; the accumulator keeps running.
    pub fn finalize(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Appends the bytes seen by `other`, as if they had been fed to `self`.
    pub fn combine(&mut self, other: &Crc32) {
        self.hasher.combine(&other.hasher);
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("value", &format_args!("{:#010X}", self.finalize()))
            .finish()
    }
}

pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::*;

    #[rstest(source, expt_crc,
        case(b"", 0x0000_0000),
        case(b"123456789", 0xCBF4_3926),
        case(b"The quick brown fox jumps over the lazy dog", 0x414F_A339),
    )]
    fn test_checksum(source: &'static [u8], expt_crc: u32) {
        assert_eq!(checksum(source), expt_crc);

        let mut crc = Crc32::new();
        crc.update(source);
        assert_eq!(crc.finalize(), expt_crc);
    }

    #[test]
    fn test_reset() {
        let mut crc = Crc32::new();
        crc.update(b"garbage");
        crc.reset();
        crc.update(b"123456789");
        assert_eq!(crc.finalize(), 0xCBF4_3926);
    }

    #[test]
    fn test_finalize_keeps_running() {
        let mut crc = Crc32::new();
        crc.update(b"1234");
        let _ = crc.finalize();
        crc.update(b"56789");
        assert_eq!(crc.finalize(), 0xCBF4_3926);
    }

    proptest! {
        #[test]
        fn combine_eq_concat(head: Vec<u8>, tail: Vec<u8>) {
            let mut outer = Crc32::new();
            outer.update(&head);
            let mut inner = Crc32::new();
            inner.update(&tail);
            outer.combine(&inner);

            let mut whole = head.clone();
            whole.extend_from_slice(&tail);
            prop_assert_eq!(outer.finalize(), checksum(&whole));
        }

        #[test]
        fn split_updates_eq_one_shot(bytes: Vec<u8>, split in 0usize..64) {
            let split = split.min(bytes.len());
            let mut crc = Crc32::new();
            crc.update(&bytes[..split]);
            crc.update(&bytes[split..]);
            prop_assert_eq!(crc.finalize(), checksum(&bytes));
        }
    }
}
