use std::any::Any;
use std::sync::Arc;

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Atomic reference-counted string type used for identifiers.
pub type ArcStr = Arc<str>;

/// A 32-byte BLAKE3 hash used to derive stable task keys and graph
/// fingerprints.
///
/// Two blueprints built by the same code (with the same sampler seed) yield
/// the same keys for the same nodes, so the fingerprint of a graph identifies
/// its topology independently of when or where it was built.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    /// The raw bytes of the hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }

    /// Short hexadecimal prefix, used as the suffix of task keys.
    pub(crate) fn to_short_hex(self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Incremental BLAKE3 hasher, fed with key material piece by piece.
#[derive(Default)]
pub(crate) struct Blake3Hasher(blake3::Hasher);

impl Blake3Hasher {
    pub(crate) fn update(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        // length prefix keeps ("ab", "c") and ("a", "bc") apart
        let bytes = bytes.as_ref();
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }
}

impl From<Blake3Hasher> for Hash32 {
    fn from(value: Blake3Hasher) -> Self {
        let bytes: [u8; 32] = value.0.finalize().into();
        Hash32::from(bytes)
    }
}

/// The mode in which a graph is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Synchronous evaluation on the calling thread and the global pool.
    Local,
    /// Asynchronous evaluation on a cluster's worker pool.
    Remote,
}

/// Information available to a task body while it runs.
///
/// Tasks are expected to be pure functions of their explicit inputs, so the
/// context carries nothing but identification and tracing.
pub struct TaskContext {
    /// The name the task was registered under.
    pub name: ArcStr,
    /// The stable key of the node, `name-<hash>`.
    pub key: ArcStr,
    /// How the graph is being evaluated.
    pub mode: Mode,
    /// Tracing span assigned to this task.
    pub(crate) span: tracing::Span,
}

impl TaskContext {
    /// The span the task runs in, for attaching progress or child spans.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}
