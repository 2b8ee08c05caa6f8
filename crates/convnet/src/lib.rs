#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use convnet_device as device;

#[doc(inline)]
pub use convnet_layers as layers;
