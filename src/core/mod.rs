pub mod bitset;
pub mod corpus;
pub mod datafile;
pub mod distance;
pub mod hash;
pub mod histogram;
pub mod image;
pub mod roc;
pub mod stats;
