pub mod app;
pub mod assembly;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod groups;
pub mod ncbi;
pub mod output;
pub mod qc;
pub mod subtree;
pub mod taxonomy;
pub mod tree;
pub mod ucsc;
pub mod xref;
