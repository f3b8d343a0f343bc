/// Incremental UTF-8 decoder that holds back an incomplete trailing sequence.
///
/// A multi-byte character split across two reads is emitted once, whole, by the
/// read that completes it. Invalid sequences decode to U+FFFD instead of
/// failing the stream.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut decoded = String::with_capacity(self.pending.len());
        let mut consumed = 0;

        while consumed < self.pending.len() {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    consumed = self.pending.len();
                }
                Err(error) => {
                    let valid_up_to = error.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                    match error.error_len() {
                        Some(invalid_len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid_up_to + invalid_len;
                        }
                        None => {
                            // Truncated sequence at the end: wait for the next read.
                            consumed += valid_up_to;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        decoded
    }

    /// Flushes bytes still held back when the transport ends.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }

        let tail = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&tail).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Utf8Decoder;

    #[test]
    fn holds_back_split_multibyte_character() {
        let bytes = "héllo".as_bytes();
        let mut decoder = Utf8Decoder::new();

        assert_eq!(decoder.decode(&bytes[..2]), "h");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(&bytes[2..]), "éllo");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn four_byte_character_survives_byte_by_byte_reads() {
        let bytes = "a🦀b".as_bytes();
        let mut decoder = Utf8Decoder::new();

        let decoded = bytes
            .iter()
            .map(|byte| decoder.decode(std::slice::from_ref(byte)))
            .collect::<String>();

        assert_eq!(decoded, "a🦀b");
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"ok\xFFok"), "ok\u{FFFD}ok");
    }

    #[test]
    fn finish_flushes_truncated_tail() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[b'x', 0xE2, 0x82]), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }
}
