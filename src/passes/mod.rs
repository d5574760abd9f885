pub mod convert;
pub mod filter;
pub mod mipmap;
pub mod projector;
pub mod readback;
pub mod upload;
