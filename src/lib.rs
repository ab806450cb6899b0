//! diagscope core library: bundle reading, log querying and profile analysis shared by the CLI.

mod archive;
mod calltree;
mod cmd;
mod config;
mod error;
mod ingest;
mod overview;
mod pprof;
mod profiles;
mod query;
mod record;
mod session;
mod window;

pub use archive::*;
pub use calltree::*;
pub use cmd::*;
pub use config::*;
pub use error::*;
pub use ingest::*;
pub use overview::*;
pub use pprof::*;
pub use profiles::*;
pub use query::*;
pub use record::*;
pub use session::*;
pub use window::*;
