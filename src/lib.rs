pub mod acquisition_log;
pub mod app;
pub mod audit;
pub mod bids;
pub mod config;
pub mod container;
pub mod convert;
pub mod correlator;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod nda;
pub mod output;
pub mod record;
pub mod subjects;
pub mod table;
pub mod upload;
