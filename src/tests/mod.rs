//! # Application Test Suite
//!
//! End-to-end checks that run the library pieces together the way `main`
//! does: a GTFS-realtime payload goes in, an arrival board comes out.
