//! Growable output sink used when serializing an image.

/// Positioned byte sink.
pub trait OutputBuffer {
    fn size(&self) -> usize;
    fn wpos(&self) -> usize;
    /// Move the write position. Positions past the current end are allowed;
    /// the gap is zero-filled on the next write.
    fn set_wpos(&mut self, pos: usize);
    fn write(&mut self, data: &[u8]);
}

#[derive(Debug, Clone, Default)]
pub struct OutputMemoryBuffer {
    data: Vec<u8>,
    wpos: usize,
}

impl OutputMemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl OutputBuffer for OutputMemoryBuffer {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn wpos(&self) -> usize {
        self.wpos
    }

    fn set_wpos(&mut self, pos: usize) {
        self.wpos = pos;
    }

    fn write(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let end = self.wpos + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.wpos..end].copy_from_slice(data);
        self.wpos = end;
    }
}
