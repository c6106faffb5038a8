//! Reports built from the listings table

pub mod cheapest;
