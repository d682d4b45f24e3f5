#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod authority;
mod block;
mod config;
mod error;
#[cfg(feature = "async-tokio")]
mod futures;
mod pool;
mod sizer;

pub use crate::authority::*;
pub use crate::block::*;
pub use crate::config::*;
pub use crate::error::*;
#[cfg_attr(docsrs, doc(cfg(feature = "async-tokio")))]
#[cfg(feature = "async-tokio")]
pub use crate::futures::*;
pub use crate::pool::*;
pub use crate::sizer::*;
