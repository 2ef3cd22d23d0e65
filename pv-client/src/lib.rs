//! Domain types and read-side queries for the PV readings history.

pub mod db;
pub mod domain;
