//! CLI commands implementation

pub mod adjust;
pub mod init;
pub mod load;
pub mod query;
pub mod run;
pub mod status;

pub use adjust::*;
pub use init::*;
pub use load::*;
pub use query::*;
pub use run::*;
pub use status::*;
