//! Retriever module
//!
//! A retriever turns one stream slice into a lazy, finite stream of records:
//!
//! ```text
//! merge request options -> send -> decode -> select records
//!        ^                                        |
//!        +------- next page token <-- observe ----+
//! ```
//!
//! Request options are merged with later sources winning:
//! requester < partition router < paginator < cursor.

mod simple;

pub use simple::SimpleRetriever;
