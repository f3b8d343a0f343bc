/// Line splitter with a single carry-over buffer.
///
/// The carry never holds a complete line: every [`FrameSplitter::push`] returns
/// all lines terminated so far and keeps at most one partial line.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    carry: String,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.carry.push_str(fragment);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.carry[start..].find('\n') {
            let end = start + offset;
            lines.push(strip_carriage_return(&self.carry[start..end]).to_string());
            start = end + 1;
        }

        self.carry.drain(..start);
        lines
    }

    /// Returns the unterminated trailing line once the transport has ended cleanly.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.carry);
        let tail = strip_carriage_return(&tail);
        if tail.is_empty() {
            None
        } else {
            Some(tail.to_string())
        }
    }

    pub fn carry(&self) -> &str {
        &self.carry
    }
}

fn strip_carriage_return(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}
