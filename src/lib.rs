//! Importance-weighted difference hashing (IDHash) for near-duplicate image
//! detection, plus the tooling to measure hash stability over a corpus and
//! calibrate a duplicate threshold by ROC analysis.

pub mod core;
