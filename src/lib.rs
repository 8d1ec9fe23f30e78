//! Branch-console engine for SIP (systematic investment plan) records:
//! spreadsheet import with server-side verify/commit, and the
//! reference-commission report as a referral hierarchy.

pub mod error;
pub mod export;
pub mod fmt;
pub mod hierarchy;
pub mod ledger;
pub mod models;
pub mod parser;
pub mod remote;
pub mod reports;
pub mod session;
pub mod settings;
