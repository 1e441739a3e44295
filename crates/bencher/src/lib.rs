use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;

#[derive(Debug, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    payload: TestPayload,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, payload: TestPayload) -> Self {
        Self { name, group, payload }
    }

    pub fn small(name: &'static str, payload: TestPayload) -> Self {
        Self::new(name, TestGroup::Small, payload)
    }

    pub fn normal(name: &'static str, payload: TestPayload) -> Self {
        Self::new(name, TestGroup::Normal, payload)
    }

    pub fn large(name: &'static str, payload: TestPayload) -> Self {
        Self::new(name, TestGroup::Large, payload)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn payload(&self) -> &TestPayload {
        &self.payload
    }
}

/// A plaintext and its zlib compressed form.
#[derive(Debug, Clone)]
pub struct TestPayload {
    plain: Vec<u8>,
    compressed: Vec<u8>,
}

impl TestPayload {
    /// Compresses `plain` at the default level.
    ///
    /// # Panics
    ///
    /// Panics if the in-memory encoder fails, which it doesn't.
    pub fn zlib(plain: Vec<u8>) -> Self {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).expect("in-memory compression");
        let compressed = encoder.finish().expect("in-memory compression");
        Self { plain, compressed }
    }

    /// `len` bytes cycling through `pattern`; compresses very well
    pub fn repeated(pattern: &[u8], len: usize) -> Self {
        Self::zlib(pattern.iter().copied().cycle().take(len).collect())
    }

    /// `len` pseudo random bytes; barely compresses
    pub fn noise(len: usize) -> Self {
        let mut state: u32 = 0x2545_f491;
        let plain = (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state.to_le_bytes()[0]
            })
            .collect();
        Self::zlib(plain)
    }

    pub fn plain(&self) -> &[u8] {
        &self.plain
    }

    pub fn compressed(&self) -> &[u8] {
        &self.compressed
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}
