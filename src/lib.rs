// src/lib.rs
mod bulk;
mod catalog;
mod companies;
mod constants;
mod context;
mod error;
mod meta;
mod range;
mod store;
mod transaction;
mod types;

pub use bulk::{encode_rows, BulkTransport, CopyInTransport, CopyRequest, PsqlTransport};
pub use catalog::{render, Catalog, Statement};
pub use constants::{BASE_RANGE_SPAN, MAX_META_KEY_LEN};
pub use context::Context;
pub use error::{Error, Result};
pub use range::{base_of, range_for, BaseRange};
pub use store::{Store, StoreOptions, Transport};
pub use types::Naming;
