//! Types for backend handles, devices and tensor metadata

use std::fmt;
use std::str::FromStr;

use crate::error::BackendError;
use crate::signal::CompletionSignal;

/// Handle to an allocated buffer
///
/// Buffers are opaque handles managed by the backend.
/// Use Backend methods to interact with buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// Create a new buffer handle
    pub const fn new(id: u64) -> Self {
        BufferHandle(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Handle to a cached (pre-bound) computation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CachedOpHandle(pub u64);

impl CachedOpHandle {
    /// Create a new cached op handle
    pub const fn new(id: u64) -> Self {
        CachedOpHandle(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CachedOpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Kind of compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Host CPU (always available)
    Cpu,
    /// Accelerator
    Gpu,
}

/// Opaque device token
///
/// Identifies the device an operation or tensor is associated with. The engine
/// passes it through unchanged; only backends interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    kind: DeviceKind,
    ordinal: u32,
}

impl Device {
    /// Create a device token
    pub const fn new(kind: DeviceKind, ordinal: u32) -> Self {
        Self { kind, ordinal }
    }

    /// The host CPU
    pub const fn cpu() -> Self {
        Self::new(DeviceKind::Cpu, 0)
    }

    /// Accelerator with the given ordinal
    pub const fn gpu(ordinal: u32) -> Self {
        Self::new(DeviceKind::Gpu, ordinal)
    }

    pub const fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub const fn ordinal(&self) -> u32 {
        self.ordinal
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Cpu => write!(f, "cpu({})", self.ordinal),
            DeviceKind::Gpu => write!(f, "gpu({})", self.ordinal),
        }
    }
}

impl FromStr for Device {
    type Err = BackendError;

    /// Parses `cpu`, `gpu`, `gpu:<n>` (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let (kind, ordinal) = match normalized.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| BackendError::InvalidDevice(s.to_string()))?;
                (kind.trim().to_string(), ordinal)
            }
            None => (normalized, 0),
        };

        match kind.as_str() {
            "cpu" if ordinal == 0 => Ok(Device::cpu()),
            "gpu" | "cuda" => Ok(Device::gpu(ordinal)),
            _ => Err(BackendError::InvalidDevice(s.to_string())),
        }
    }
}

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
    U8,
}

impl DType {
    /// Size of one element in bytes
    pub const fn size_of(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::U8 => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
        };
        f.write_str(name)
    }
}

/// Rust scalar types that map onto a [`DType`]
pub trait Element: bytemuck::Pod {
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;
}

impl Element for i64 {
    const DTYPE: DType = DType::I64;
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;
}

/// Number of elements described by a shape, `None` on overflow. A rank-0
/// shape is a scalar.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |count, &dim| count.checked_mul(dim))
}

/// Bytes needed for `shape` elements of `dtype`, `None` on overflow
pub fn byte_len(dtype: DType, shape: &[usize]) -> Option<usize> {
    element_count(shape)?.checked_mul(dtype.size_of())
}

/// Declared name, element type and shape of a graph input or output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, dtype: DType, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape: shape.into(),
        }
    }

    /// Bytes needed to store one tensor of this spec
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ShapeOverflow`] if the size does not fit in `usize`.
    pub fn byte_len(&self) -> crate::Result<usize> {
        byte_len(self.dtype, &self.shape).ok_or_else(|| BackendError::ShapeOverflow(self.shape.clone()))
    }
}

/// A buffer bound to a graph input name for one forward call
#[derive(Debug, Clone)]
pub struct ForwardInput {
    pub name: String,
    pub handle: BufferHandle,
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// Readiness of the buffer contents; the backend orders its reads after it.
    pub signal: CompletionSignal,
}

/// A buffer produced by one forward call
///
/// The buffer contents are only valid once `signal` reports completion.
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    pub name: String,
    pub handle: BufferHandle,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub signal: CompletionSignal,
}
