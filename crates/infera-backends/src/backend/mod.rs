//! Backend trait and types for native tensor memory and graph execution

mod traits;
mod types;

pub use traits::Backend;
pub use types::{
    byte_len, element_count, BufferHandle, CachedOpHandle, DType, Device, DeviceKind, Element, ForwardInput,
    ForwardOutput, TensorSpec,
};
