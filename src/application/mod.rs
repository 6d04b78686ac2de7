//! Error surface shared by the HTTP layer and the binary.

pub mod error;
