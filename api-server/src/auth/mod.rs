//! User-session authentication for the HTTP and gateway surfaces.

pub mod jwt;
