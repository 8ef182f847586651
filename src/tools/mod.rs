//! Tools and helpers

pub mod cookie;
pub mod dtos;
pub mod encoding;
pub mod formdata;
pub mod jwt;
pub mod options;
