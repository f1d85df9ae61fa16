//! Binary format support

pub mod pe;
